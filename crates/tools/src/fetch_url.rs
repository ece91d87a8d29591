//! Fetch URL tool: reads a web page and returns its readable text.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use scarlett_core::error::ToolError;
use scarlett_core::tool::{Tool, ToolOutput};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ScarlettBot/1.0)";

/// Maximum body size read before conversion (2MB).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Line width handed to the HTML renderer.
const RENDER_WIDTH: usize = 120;

pub struct FetchUrlTool {
    client: reqwest::Client,
    timeout: Duration,
    default_max_length: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FetchArgs {
    url: String,
    max_length: Option<usize>,
}

impl FetchUrlTool {
    pub fn new(timeout: Duration, default_max_length: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            timeout,
            default_max_length,
        }
    }

    async fn fetch(&self, url: &str) -> Result<(String, String), ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "fetch_url".into(),
            reason,
        };

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool_name: "fetch_url".into(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                failed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP error: {}", response.status())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_BYTES)]).into_owned();
        Ok((content_type, body))
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), 5000)
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch and read the text content of a URL. Use when the user shares a link or asks about a specific webpage."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 5000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: FetchArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let url = args.url.trim();
        if url.is_empty() {
            return Ok(ToolOutput::text("Error: Empty URL."));
        }

        tracing::debug!(url, "Fetching page");
        let (content_type, body) = self.fetch(url).await?;
        let text = if content_type.contains("html") {
            html_to_text(&body)
        } else {
            body
        };

        let text = truncate(text.trim(), args.max_length.unwrap_or(self.default_max_length));
        if text.is_empty() {
            return Ok(ToolOutput::text("No readable content found."));
        }
        Ok(ToolOutput::Text(text))
    }
}

/// Render HTML as plain text. Falls back to the raw markup if rendering fails.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), RENDER_WIDTH).unwrap_or_else(|_| html.to_string())
}

/// Keep the first `max_chars` characters, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n...(truncated)", &text[..cut]),
        None => text.to_string(),
    }
}
