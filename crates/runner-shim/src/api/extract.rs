//! Body extractor for the runner routes.
//!
//! Unlike `axum::Json` this ignores the content type, treats an empty body as
//! `{}`, and rejects with the runner's own error bodies: unparseable JSON is
//! `Invalid JSON`, a missing or mistyped field is reported by name.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;

use crate::error::RunnerError;

pub struct WireJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for WireJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RunnerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| RunnerError::InvalidRequest(e.body_text()))?;
        decode_body(&bytes).map(WireJson)
    }
}

pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RunnerError> {
    let value = if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_slice::<serde_json::Value>(bytes).map_err(|_| RunnerError::InvalidJson)?
    };
    serde_json::from_value(value).map_err(|e| RunnerError::InvalidRequest(e.to_string()))
}
