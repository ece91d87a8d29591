//! Web search tool backed by the Tavily REST API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use scarlett_core::error::ToolError;
use scarlett_core::tool::{Tool, ToolOutput};

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

const MAX_RESULTS: usize = 5;
const SNIPPET_CHARS: usize = 200;

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: TAVILY_ENDPOINT.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Point at a different Tavily-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search(&self, api_key: &str, query: &str) -> Result<SearchResponse, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": MAX_RESULTS,
            "include_answer": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP error: {}", response.status())));
        }

        response.json().await.map_err(|e| failed(format!("Invalid search response: {e}")))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information using Tavily. Use when the user asks about recent events, news, \
         facts you're unsure of, or anything requiring up-to-date information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: SearchArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolOutput::text("Error: TAVILY_API_KEY is not set."));
        };
        let query = args.query.trim();
        if query.is_empty() {
            return Ok(ToolOutput::text("Error: Empty search query."));
        }

        tracing::debug!(query, "Searching the web");
        let response = self.search(api_key, query).await?;
        Ok(ToolOutput::Text(render_results(&response)))
    }
}

/// `Summary: ...` followed by one markdown bullet per hit.
pub fn render_results(response: &SearchResponse) -> String {
    let mut parts = Vec::new();

    if let Some(answer) = response.answer.as_deref().filter(|a| !a.is_empty()) {
        parts.push(format!("Summary: {answer}"));
    }

    for hit in response.results.iter().take(MAX_RESULTS) {
        let snippet: String = hit.content.chars().take(SNIPPET_CHARS).collect();
        parts.push(format!("- [{}]({}): {}", hit.title, hit.url, snippet));
    }

    if parts.is_empty() {
        "No results found.".into()
    } else {
        parts.join("\n")
    }
}
