mod client;
mod envelope;

pub use client::{ApiError, ApiErrorClass, CasebookClient};
pub use envelope::Envelope;
