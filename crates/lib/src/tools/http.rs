//! Executor that forwards operation calls to an HTTP service.

use crate::tools::CapabilityExecutor;
use async_trait::async_trait;
use serde_json::Value;

/// POSTs `arguments` as JSON to `{base_url}/{operation}` with an optional bearer token.
/// A JSON response body is returned as-is; any other body is returned as a string.
#[derive(Clone)]
pub struct HttpToolExecutor {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpToolExecutor {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CapabilityExecutor for HttpToolExecutor {
    async fn invoke(&self, operation: &str, arguments: &Value) -> Result<Value, String> {
        let url = format!("{}/{}", self.base_url, operation);
        let mut req = self.client.post(&url).json(arguments);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.map_err(|e| e.to_string())?;
        let status = res.status();
        let body = res.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("{} {}", status, body));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
