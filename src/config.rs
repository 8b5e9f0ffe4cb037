//! Environment-driven application configuration.
//!
//! Provider credentials use the conventional vendor variables; the
//! `CHAT_AGENT_*` namespace covers everything else. Malformed values
//! fail startup rather than silently falling back.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use model_provider::Provider;
use provider_anthropic::{AnthropicProvider, AnthropicProviderConfig};
use provider_mock::MockProvider;
use provider_openai::{OpenAiProvider, OpenAiProviderConfig};

use crate::session::SessionConfig;
use crate::tools::{ToolDispatcher, WebSearchTool, WriteFileTool};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue {
        variable: &'static str,
        value: String,
    },
    ProviderInit(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { variable, value } => {
                write!(f, "invalid value for {variable}: {value}")
            }
            Self::ProviderInit(message) => write!(f, "provider initialization failed: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything the binary needs to assemble a session.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub local_base_url: Option<String>,
    pub tavily_api_key: Option<String>,
    pub web_search_enabled: bool,
    pub search_max_results: Option<u32>,
    pub search_depth: Option<String>,
    pub use_mock: bool,
    pub model: String,
    pub fallback_chain: Vec<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub deadline: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            local_base_url: non_empty_var("CHAT_AGENT_LOCAL_URL"),
            tavily_api_key: non_empty_var("TAVILY_API_KEY"),
            web_search_enabled: bool_var("CHAT_AGENT_WEB_SEARCH")?.unwrap_or(false),
            search_max_results: parsed_var("CHAT_AGENT_SEARCH_MAX_RESULTS")?,
            search_depth: non_empty_var("CHAT_AGENT_SEARCH_DEPTH"),
            use_mock: bool_var("CHAT_AGENT_USE_MOCK")?.unwrap_or(false),
            model: non_empty_var("CHAT_AGENT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_chain: list_var("CHAT_AGENT_FALLBACK"),
            system_prompt: non_empty_var("CHAT_AGENT_SYSTEM_PROMPT"),
            max_tokens: parsed_var("CHAT_AGENT_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: parsed_var("CHAT_AGENT_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
            deadline: parsed_var::<u64>("CHAT_AGENT_DEADLINE_SECS")?.map(Duration::from_secs),
        })
    }

    /// Builds the provider set. Credential-less providers are simply not
    /// constructed; with nothing configured the mock provider steps in
    /// so the binary stays usable offline.
    pub fn build_providers(&self) -> Result<Vec<Arc<dyn Provider>>, ConfigError> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        if let Some(api_key) = self.anthropic_api_key.as_deref() {
            let provider = AnthropicProvider::new(AnthropicProviderConfig::new(api_key))
                .map_err(|error| ConfigError::ProviderInit(error.to_string()))?;
            providers.push(Arc::new(provider));
        }

        if let Some(api_key) = self.openai_api_key.as_deref() {
            let provider = OpenAiProvider::new(OpenAiProviderConfig::openai(api_key))
                .map_err(|error| ConfigError::ProviderInit(error.to_string()))?;
            providers.push(Arc::new(provider));
        }

        if let Some(base_url) = self.local_base_url.as_deref() {
            let provider = OpenAiProvider::new(OpenAiProviderConfig::local(base_url))
                .map_err(|error| ConfigError::ProviderInit(error.to_string()))?;
            providers.push(Arc::new(provider));
        }

        if self.use_mock || providers.is_empty() {
            if providers.is_empty() && !self.use_mock {
                tracing::warn!("no provider credentials configured; using the mock provider");
            }
            providers.push(Arc::new(MockProvider::default()));
        }

        Ok(providers)
    }

    /// Registers tools per configuration. `write_file` is always on;
    /// `web_search` is registered when enabled but disabled until a
    /// search API key is present.
    #[must_use]
    pub fn build_dispatcher(&self) -> ToolDispatcher {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(Arc::new(WriteFileTool::default()));

        if self.web_search_enabled {
            let api_key = self.tavily_api_key.clone().unwrap_or_default();
            let missing_key = api_key.is_empty();
            let mut tool = WebSearchTool::new(api_key);
            if let Some(max_results) = self.search_max_results {
                tool = tool.with_max_results(max_results);
            }
            if let Some(depth) = self.search_depth.as_deref() {
                tool = tool.with_search_depth(depth);
            }
            dispatcher.register(Arc::new(tool));
            if missing_key {
                tracing::warn!("web search enabled without TAVILY_API_KEY; tool disabled");
                dispatcher.disable("web_search");
            }
        }

        dispatcher
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.clone(),
            fallback_chain: self.fallback_chain.clone(),
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            deadline: self.deadline,
        }
    }
}

fn non_empty_var(variable: &str) -> Option<String> {
    env::var(variable)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn list_var(variable: &str) -> Vec<String> {
    non_empty_var(variable)
        .map(|value| {
            value
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn bool_var(variable: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(value) = non_empty_var(variable) else {
        return Ok(None);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { variable, value }),
    }
}

fn parsed_var<T: std::str::FromStr>(variable: &'static str) -> Result<Option<T>, ConfigError> {
    let Some(value) = non_empty_var(variable) else {
        return Ok(None);
    };

    value
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { variable, value })
}
