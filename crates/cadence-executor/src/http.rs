//! HTTP executor: fire an outbound request bounded by a deadline.
//!
//! Only transport-level failures (connect errors, timeouts) fail the task. The
//! response status is logged but a 4xx/5xx still counts as a completed run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::ExecutorConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TaskExecutor;
use cadence_core::types::TaskDefinition;
use serde::{Deserialize, Serialize};

/// Payload of an `http` task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpParams {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Serialized as JSON when present.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Seconds; falls back to the executor default when absent or zero.
    #[serde(default, alias = "timeout_seconds", alias = "timeoutSeconds")]
    pub timeout: Option<u64>,
}

pub struct HttpExecutor {
    client: reqwest::Client,
    default_timeout_secs: u64,
}

impl HttpExecutor {
    pub fn new(default_timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| CadenceError::Config(format!("HTTP client error: {e}")))?;
        Ok(Self {
            client,
            default_timeout_secs,
        })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        Self::new(config.http_timeout_secs, &config.user_agent)
    }

    fn build_request(&self, params: &HttpParams, timeout: Duration) -> Result<reqwest::RequestBuilder> {
        if params.url.trim().is_empty() {
            return Err(CadenceError::InvalidParams("missing 'url'".into()));
        }
        let method_name = params.method.as_deref().unwrap_or("GET").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| CadenceError::InvalidParams(format!("unsupported method: {method_name}")))?;

        let mut request = self.client.request(method, &params.url).timeout(timeout);

        for (key, value) in &params.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(body) = &params.body {
            let has_content_type = params
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                request = request.header("Content-Type", "application/json");
            }
            request = request.body(serde_json::to_vec(body)?);
        }

        Ok(request)
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, task: &TaskDefinition) -> Result<()> {
        let params: HttpParams = crate::parse_params(&task.params, "HTTP")?;
        let secs = match params.timeout {
            Some(t) if t > 0 => t,
            _ => self.default_timeout_secs,
        };

        let request = self.build_request(&params, Duration::from_secs(secs))?;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CadenceError::Timeout {
                    what: format!("HTTP request to {}", params.url),
                    secs,
                    output: None,
                }
            } else {
                CadenceError::Execution(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("🌐 Task #{} HTTP {} → {}", task.id, params.url, status);
        } else {
            tracing::warn!("🌐 Task #{} HTTP {} → {} (non-2xx)", task.id, params.url, status);
        }
        Ok(())
    }
}
