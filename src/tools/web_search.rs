//! Web search tool backed by the Tavily search API.

use std::sync::atomic::Ordering;
use std::time::Duration;

use model_provider::{CancelSignal, ToolDefinition};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{string_argument, ToolExecutor, ToolOutcome};

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const DEFAULT_MAX_RESULTS: u32 = 5;
const DEFAULT_SEARCH_DEPTH: &str = "basic";

pub struct WebSearchTool {
    api_key: String,
    endpoint: String,
    max_results: u32,
    search_depth: String,
}

/// Per-call options resolved from the arguments, falling back to the
/// tool's configured defaults.
#[derive(Debug, PartialEq, Eq)]
struct SearchOptions {
    max_results: u32,
    search_depth: String,
}

impl WebSearchTool {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            search_depth: DEFAULT_SEARCH_DEPTH.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    #[must_use]
    pub fn with_search_depth(mut self, search_depth: impl Into<String>) -> Self {
        self.search_depth = search_depth.into();
        self
    }

    fn resolve_options(&self, arguments: &Map<String, Value>) -> SearchOptions {
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(self.max_results, |value| value as u32);
        let search_depth =
            string_argument(arguments, "search_depth").unwrap_or_else(|| self.search_depth.clone());

        SearchOptions {
            max_results,
            search_depth,
        }
    }

    fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancelSignal,
    ) -> Result<SearchResponse, String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| format!("failed to initialize tokio runtime: {error}"))?;

        runtime.block_on(async {
            let client = reqwest::Client::builder()
                .timeout(SEARCH_TIMEOUT)
                .build()
                .map_err(|error| error.to_string())?;

            let body = json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": options.max_results,
                "search_depth": options.search_depth,
                "include_answer": true,
            });

            let request = client.post(&self.endpoint).json(&body).send();
            let mut request = Box::pin(request);

            let response = loop {
                if cancel.load(Ordering::Acquire) {
                    return Err("search cancelled".to_string());
                }
                match tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut request).await {
                    Ok(result) => break result.map_err(|error| error.to_string())?,
                    Err(_) => continue,
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(format!("search failed with HTTP {status}: {}", body.trim()));
            }

            response
                .json::<SearchResponse>()
                .await
                .map_err(|error| format!("malformed search response: {error}"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl ToolExecutor for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web and return summarized results.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query",
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results to return",
                    },
                    "search_depth": {
                        "type": "string",
                        "enum": ["basic", "advanced"],
                        "description": "Search depth, defaults to the configured depth",
                    },
                },
                "required": ["query"],
            }),
        }
    }

    fn execute(&self, arguments: &Map<String, Value>, cancel: &CancelSignal) -> ToolOutcome {
        let Some(query) = string_argument(arguments, "query") else {
            return ToolOutcome::fail("missing required argument: query");
        };
        if query.trim().is_empty() {
            return ToolOutcome::fail("query must not be empty");
        }
        if self.api_key.trim().is_empty() {
            return ToolOutcome::fail("web search is not configured: missing API key");
        }

        let options = self.resolve_options(arguments);
        match self.search(&query, &options, cancel) {
            Ok(response) => ToolOutcome::ok(json!({
                "answer": response.answer,
                "results": response
                    .results
                    .into_iter()
                    .map(|result| json!({
                        "title": result.title,
                        "url": result.url,
                        "content": result.content,
                    }))
                    .collect::<Vec<Value>>(),
            })),
            Err(message) => ToolOutcome::fail(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::*;

    fn cancel() -> CancelSignal {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn missing_query_fails_before_any_request() {
        let tool = WebSearchTool::new("key");
        let outcome = tool.execute(&Map::new(), &cancel());
        assert!(!outcome.success);
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|message| message.contains("query")));
    }

    #[test]
    fn missing_api_key_fails_before_any_request() {
        let tool = WebSearchTool::new("");
        let mut arguments = Map::new();
        arguments.insert("query".to_string(), json!("rust streaming"));

        let outcome = tool.execute(&arguments, &cancel());
        assert!(!outcome.success);
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|message| message.contains("API key")));
    }

    #[test]
    fn call_arguments_override_configured_defaults() {
        let tool = WebSearchTool::new("key")
            .with_max_results(3)
            .with_search_depth("advanced");

        let mut arguments = Map::new();
        arguments.insert("max_results".to_string(), json!(7));
        arguments.insert("search_depth".to_string(), json!("basic"));
        assert_eq!(
            tool.resolve_options(&arguments),
            SearchOptions {
                max_results: 7,
                search_depth: "basic".to_string(),
            }
        );
    }

    #[test]
    fn missing_arguments_fall_back_to_configured_defaults() {
        let tool = WebSearchTool::new("key")
            .with_max_results(3)
            .with_search_depth("advanced");

        assert_eq!(
            tool.resolve_options(&Map::new()),
            SearchOptions {
                max_results: 3,
                search_depth: "advanced".to_string(),
            }
        );
    }

    #[test]
    fn schema_declares_the_per_call_options() {
        let schema = WebSearchTool::new("key").definition().input_schema;
        assert!(schema["properties"]["max_results"].is_object());
        assert!(schema["properties"]["search_depth"].is_object());
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn search_response_parses_optional_fields() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"results":[{"title":"t","url":"u","content":"c"},{"url":"only-url"}]}"#,
        )
        .expect("response parses");
        assert!(parsed.answer.is_none());
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[1].title, "");
    }
}
