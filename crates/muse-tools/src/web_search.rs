use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{required_str, Tool, ToolContext, ToolResult};

/// Web lookup via the DuckDuckGo instant-answer API. Best-effort: network
/// failures become tool errors, never agent failures.
pub struct WebSearch {
    client: reqwest::Client,
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearch {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for factual information. Returns a short summary and \
         related topics for the query."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let query = match required_str(&input, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        debug!(query, "web search");

        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await;

        let payload: Value = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(v) => v,
                Err(e) => return ToolResult::error(format!("search response unreadable: {e}")),
            },
            Ok(resp) => {
                return ToolResult::error(format!("search failed with status {}", resp.status()))
            }
            Err(e) => return ToolResult::error(format!("search request failed: {e}")),
        };

        let mut out = String::new();
        if let Some(abstract_text) = payload.get("AbstractText").and_then(|v| v.as_str()) {
            if !abstract_text.is_empty() {
                out.push_str(abstract_text);
                out.push('\n');
            }
        }
        if let Some(topics) = payload.get("RelatedTopics").and_then(|v| v.as_array()) {
            for topic in topics.iter().take(5) {
                if let Some(text) = topic.get("Text").and_then(|v| v.as_str()) {
                    out.push_str(&format!("- {text}\n"));
                }
            }
        }
        if out.is_empty() {
            out = format!("No direct results for '{query}'.");
        }
        ToolResult::success(out)
    }
}
