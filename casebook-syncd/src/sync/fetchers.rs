use casebook_core::Envelope;
use serde_json::Value;
use tracing::{error, info, warn};

use super::engine::{SyncEngine, SyncError};
use crate::mirror::{Collection, Record};

impl SyncEngine {
    pub(super) async fn sync_direct(
        &self,
        task: &str,
        endpoint: &str,
        envelope: Envelope,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        let written = self
            .fetch_direct(endpoint, envelope, collection)
            .await
            .inspect_err(|err| error!(task, endpoint, error = %err, "sync task failed"))?;
        info!(task, collection = %collection, records = written, "synced");
        Ok(written)
    }

    async fn fetch_direct(
        &self,
        endpoint: &str,
        envelope: Envelope,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        let payload = self.client.get_collection(endpoint, envelope).await?;
        let records = tag_records(collection, payload, None)?;
        Ok(self.store.bulk_put(collection, &records).await?)
    }

    /// Fetches `/{parent_segment}/{id}/users` for every mirrored parent and
    /// stores all rows at once. A parent whose request fails is skipped.
    pub(super) async fn sync_fan_out(
        &self,
        task: &str,
        parent: Collection,
        parent_segment: &str,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        let written = self
            .fetch_fan_out(task, parent, parent_segment, collection)
            .await
            .inspect_err(|err| error!(task, parent = %parent, error = %err, "sync task failed"))?;
        info!(task, collection = %collection, records = written, "synced");
        Ok(written)
    }

    async fn fetch_fan_out(
        &self,
        task: &str,
        parent: Collection,
        parent_segment: &str,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        let parent_key = collection
            .parent_key()
            .ok_or(SyncError::NoParentKey(collection))?;
        let parents = self.store.to_array(parent).await?;

        let mut rows = Vec::new();
        for parent_record in &parents {
            let (Some(parent_id), Some(raw_id)) =
                (parent.key_for(parent_record), parent_record.get("id"))
            else {
                warn!(task, parent = %parent, "mirrored parent has no id, skipping");
                continue;
            };
            let segments = [parent_segment, parent_id.as_str(), "users"];
            let tagged = match self.client.get_collection_at(&segments, Envelope::Data).await {
                Ok(payload) => tag_records(collection, payload, Some((parent_key, raw_id))),
                Err(err) => {
                    warn!(
                        task,
                        parent_id = %parent_id,
                        retryable = err.is_retryable(),
                        error = %err,
                        "failed to fetch users for parent"
                    );
                    continue;
                }
            };
            match tagged {
                Ok(mut tagged) => rows.append(&mut tagged),
                Err(err) => {
                    warn!(task, parent_id = %parent_id, error = %err, "skipping malformed users payload")
                }
            }
        }

        Ok(self.store.bulk_put(collection, &rows).await?)
    }
}

/// Marks each record as written by the sync engine, denormalising the owning
/// entity's id onto assignment rows as the backend sent it.
fn tag_records(
    collection: Collection,
    payload: Vec<Value>,
    parent: Option<(&str, &Value)>,
) -> Result<Vec<Record>, SyncError> {
    payload
        .into_iter()
        .map(|value| {
            let Value::Object(mut record) = value else {
                return Err(SyncError::InvalidRecord { collection });
            };
            if let Some((key, id)) = parent {
                record.insert(key.to_string(), id.clone());
            }
            record.insert("synced".to_string(), Value::Bool(true));
            Ok(record)
        })
        .collect()
}
