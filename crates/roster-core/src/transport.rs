use roster_shared::ListQuery;
use serde_json::Value;

/// Failure of one backend call. Carried as a value; nothing in the engine
/// panics on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request to {path} failed: {message}")]
    Network { path: String, message: String },

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("invalid request: {0}")]
    Request(String),
}

/// The two call shapes the list screens use.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// `GET <path>?page=..&limit=..[&filter=..]`, returning the raw envelope.
    async fn get_list(&self, path: &str, query: &ListQuery) -> Result<Value, TransportError>;

    /// `PUT <path>` with a JSON body.
    async fn put_json(&self, path: &str, body: &Value) -> Result<(), TransportError>;
}
