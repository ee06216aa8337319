//! HTTP executor for `api` tasks.

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use offsync_common::{Error, HttpMethod, Result};
use offsync_queue::SyncTask;

use crate::executor::TaskExecutor;

/// Executes `api` tasks against their REST endpoint.
///
/// 2xx is success, 409 and 412 report a conflict carrying the server's body,
/// anything else is a retryable network error.
pub struct HttpExecutor {
    http: Client,
}

impl HttpExecutor {
    /// Create an executor with its own client.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("Offsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create an executor sharing an existing client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    async fn read_body(response: Response) -> Result<Value> {
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn handle_response(&self, response: Response) -> Result<Value> {
        let status = response.status();

        if status.is_success() {
            Self::read_body(response).await
        } else if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            let server_value = Self::read_body(response).await?;
            Err(Error::conflict(format!("Server returned {}", status), server_value))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, task: &SyncTask) -> Result<Value> {
        let url = task
            .url
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("Task {} has no url", task.id)))?;
        let method = task
            .method
            .ok_or_else(|| Error::Validation(format!("Task {} has no method", task.id)))?;

        debug!("{} {} (task {})", method, url, task.id);

        let mut request = self
            .http
            .request(Self::method(method), url)
            .header("X-Sync-Task-Id", task.id.as_str());
        for (name, value) in &task.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !task.payload.is_null() {
            request = request.json(&task.payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request to {} failed: {}", url, e)))?;

        self.handle_response(response).await
    }
}
