use crate::config::ServiceConfig;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

/// Transport-neutral view of one HTTP request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Generated per request and echoed in the response envelope.
    pub id: String,
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: String,
}

impl ApiRequest {
    pub fn query_i64(&self, name: &str) -> Result<i64, String> {
        let Some(raw) = self.query.get(name) else {
            return Err(format!("missing query parameter {name}"));
        };
        raw.trim()
            .parse::<i64>()
            .map_err(|_| format!("query parameter {name} must be an integer"))
    }

    pub fn query_str(&self, name: &str) -> Result<&str, String> {
        self.query
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| format!("missing query parameter {name}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Per-worker state: the shared configuration plus this worker's own
/// connection.
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub db: Connection,
}
