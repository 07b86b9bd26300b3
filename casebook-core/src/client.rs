use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::envelope::Envelope;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("response from {path} has no records array")]
    MissingPayload { path: String },
    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Bearer-authenticated client for the case-management backend.
#[derive(Clone)]
pub struct CasebookClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CasebookClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: normalize_base(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(path)?;
        self.get_url(url).await
    }

    async fn get_url(&self, url: Url) -> Result<Value, ApiError> {
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches a collection endpoint and unwraps its records array.
    pub async fn get_collection(
        &self,
        path: &str,
        envelope: Envelope,
    ) -> Result<Vec<Value>, ApiError> {
        let body = self.get_json(path).await?;
        envelope
            .records(body)
            .ok_or_else(|| ApiError::MissingPayload {
                path: path.to_string(),
            })
    }

    /// Like [`get_collection`](Self::get_collection), but each segment is
    /// percent-encoded on its own so ids cannot escape the intended path.
    pub async fn get_collection_at(
        &self,
        segments: &[&str],
        envelope: Envelope,
    ) -> Result<Vec<Value>, ApiError> {
        let url = self.segment_endpoint(segments)?;
        let path = url.path().to_string();
        let body = self.get_url(url).await?;
        envelope
            .records(body)
            .ok_or(ApiError::MissingPayload { path })
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn segment_endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        // `PathSegmentsMut` drops dot segments instead of encoding them.
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(ApiError::InvalidSegment(bad.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api { status, body })
        }
    }
}

// `Url::join` replaces the last path segment unless the base ends with '/',
// which would drop prefixes such as `/api/v1`.
fn normalize_base(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
