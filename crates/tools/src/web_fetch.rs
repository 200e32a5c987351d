//! Web fetch tool: HTTP GET a page and return its body.

use async_trait::async_trait;
use pincer_core::error::ToolError;
use pincer_core::tool::{Tool, ToolContext, ToolResult, parse_arguments};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct WebFetchArgs {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

pub struct WebFetchTool {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl WebFetchTool {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pincer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }
}

fn failed(reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "web".into(),
        reason: reason.into(),
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, ToolError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ToolError::InvalidArguments(format!("web: invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ToolError::InvalidArguments(format!("web: invalid value for header '{name}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Fetch a web page or API endpoint with HTTP GET and return the response body."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http:// or https:// URL to fetch"
                },
                "headers": {
                    "type": "object",
                    "description": "Optional request headers",
                    "additionalProperties": { "type": "string" }
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolResult, ToolError> {
        let args: WebFetchArgs = parse_arguments(self.name(), &arguments)?;

        let url = reqwest::Url::parse(args.url.trim())
            .map_err(|e| ToolError::InvalidArguments(format!("web: invalid url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArguments(format!(
                "web: unsupported scheme '{}', use http or https",
                url.scheme()
            )));
        }
        let headers = header_map(&args.headers)?;

        debug!(url = %url, session = %ctx.session_key, "Fetching URL");

        let fetch = async {
            let mut response = self
                .client
                .get(url.clone())
                .headers(headers)
                .send()
                .await
                .map_err(|e| failed(e.to_string()))?;
            let status = response.status();

            let mut body = Vec::new();
            let mut capped = false;
            while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
                let room = self.max_body_bytes.saturating_sub(body.len());
                if chunk.len() > room {
                    body.extend_from_slice(&chunk[..room]);
                    capped = true;
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok::<_, ToolError>((status, String::from_utf8_lossy(&body).into_owned(), capped))
        };

        let (status, mut body, capped) = tokio::select! {
            result = fetch => result?,
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Cancelled(format!("web: fetch of {url} cancelled")));
            }
        };

        if capped {
            body.push_str(&format!("\n\n[body capped at {} bytes]", self.max_body_bytes));
        }

        if status.is_success() {
            Ok(ToolResult::ok(body))
        } else {
            Ok(ToolResult::failed(format!("HTTP {status}\n\n{body}")))
        }
    }
}
