//! Configuration for provider calls and turn orchestration
//!
//! [`ApiConfig`] is a plain value passed into every provider and generator call.
//! There is no process-wide settings object: the caller builds a config (from
//! stored provider settings, the environment, or by hand) and hands a copy to
//! each turn.

use crate::retry::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Default API version sent to Azure OpenAI deployments
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Default number of model round-trips per user submission
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Wire-protocol family a provider name maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Standard `/chat/completions` endpoint with `Authorization: Bearer`
    OpenAiCompatible,
    /// Azure OpenAI deployment endpoint with `api-key` header
    AzureOpenAi,
}

/// Static provider table: name, protocol family, default endpoint.
///
/// Names are matched case-insensitively. An empty default endpoint means the
/// caller must supply one.
const PROVIDER_TABLE: &[(&str, ProviderKind, &str)] = &[
    ("openai", ProviderKind::OpenAiCompatible, "https://api.openai.com/v1"),
    ("openai-compatible", ProviderKind::OpenAiCompatible, ""),
    ("deepseek", ProviderKind::OpenAiCompatible, "https://api.deepseek.com/v1"),
    ("groq", ProviderKind::OpenAiCompatible, "https://api.groq.com/openai/v1"),
    ("ollama", ProviderKind::OpenAiCompatible, "http://localhost:11434/v1"),
    ("lmstudio", ProviderKind::OpenAiCompatible, "http://localhost:1234/v1"),
    ("azure", ProviderKind::AzureOpenAi, ""),
    ("azure-openai", ProviderKind::AzureOpenAi, ""),
];

impl ProviderKind {
    /// Look up the protocol family for a provider name
    pub fn for_provider(name: &str) -> Option<Self> {
        lookup(name).map(|(_, kind, _)| *kind)
    }
}

fn lookup(name: &str) -> Option<&'static (&'static str, ProviderKind, &'static str)> {
    let name = name.trim().to_lowercase();
    PROVIDER_TABLE.iter().find(|(n, _, _)| *n == name)
}

/// Names accepted by [`ProviderKind::for_provider`]
pub fn known_providers() -> Vec<&'static str> {
    PROVIDER_TABLE.iter().map(|(n, _, _)| *n).collect()
}

/// Default endpoint for a provider name, if it has one
pub fn default_endpoint(provider: &str) -> Option<&'static str> {
    lookup(provider)
        .map(|(_, _, url)| *url)
        .filter(|url| !url.is_empty())
}

/// Get the endpoint from environment variable or provider default
///
/// Priority:
/// 1. PLAYGROUND_ENDPOINT environment variable
/// 2. Provider default endpoint
/// 3. fallback parameter
pub fn get_endpoint(provider: &str, fallback: Option<&str>) -> Option<String> {
    if let Ok(url) = env::var("PLAYGROUND_ENDPOINT") {
        return Some(url);
    }

    if let Some(url) = default_endpoint(provider) {
        return Some(url.to_string());
    }

    fallback.map(|s| s.to_string())
}

/// Settings for one model call.
///
/// Passed by value into every provider/generator call; a turn works on its
/// own copy for its whole duration.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub provider: String,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// Global default system prompt, lowest precedence
    #[serde(default)]
    pub system_prompt: String,
    /// Azure only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("presence_penalty", &self.presence_penalty)
            .field("system_prompt", &self.system_prompt)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            endpoint: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: 0.7,
            max_tokens: Some(2048),
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            system_prompt: String::new(),
            api_version: None,
        }
    }
}

impl ApiConfig {
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder::default()
    }

    /// Build a config from `PLAYGROUND_*` environment variables.
    ///
    /// `PLAYGROUND_PROVIDER` defaults to `openai`; the endpoint falls back to
    /// the provider default.
    pub fn from_env() -> Result<Self> {
        let provider = env::var("PLAYGROUND_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let mut builder = ApiConfig::builder().provider(provider.clone());

        if let Some(endpoint) = get_endpoint(&provider, None) {
            builder = builder.endpoint(endpoint);
        }
        if let Ok(key) = env::var("PLAYGROUND_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Ok(model) = env::var("PLAYGROUND_MODEL") {
            builder = builder.model(model);
        }

        builder.build()
    }

    /// Protocol family of [`ApiConfig::provider`]
    pub fn kind(&self) -> Result<ProviderKind> {
        ProviderKind::for_provider(&self.provider)
            .ok_or_else(|| Error::config(format!("Unknown provider '{}'", self.provider)))
    }

    /// Checks everything a provider call needs, before any network I/O.
    pub fn validate(&self) -> Result<()> {
        self.kind()?;
        if self.endpoint.trim().is_empty() {
            return Err(Error::config(format!(
                "endpoint is required for provider '{}'",
                self.provider
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::config(format!(
                "API key is required for provider '{}'",
                self.provider
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config("model is required"));
        }
        Ok(())
    }

    /// Overlay stored provider credentials onto this config
    pub fn with_provider_config(mut self, stored: &ProviderConfig) -> Self {
        self.provider = stored.provider.clone();
        if !stored.endpoint.is_empty() {
            self.endpoint = stored.endpoint.clone();
        }
        if !stored.api_key.is_empty() {
            self.api_key = stored.api_key.clone();
        }
        if stored.api_version.is_some() {
            self.api_version = stored.api_version.clone();
        }
        self
    }

    /// API version for Azure requests
    pub fn api_version(&self) -> &str {
        self.api_version
            .as_deref()
            .unwrap_or(DEFAULT_AZURE_API_VERSION)
    }
}

#[derive(Default)]
pub struct ApiConfigBuilder {
    provider: Option<String>,
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    system_prompt: Option<String>,
    api_version: Option<String>,
}

impl std::fmt::Debug for ApiConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfigBuilder")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl ApiConfigBuilder {
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Build the config. The endpoint falls back to the provider default.
    ///
    /// The API key is not checked here; [`ApiConfig::validate`] does that right
    /// before a call, so configs can be assembled incrementally.
    pub fn build(self) -> Result<ApiConfig> {
        let defaults = ApiConfig::default();
        let provider = self.provider.unwrap_or(defaults.provider);

        if ProviderKind::for_provider(&provider).is_none() {
            return Err(Error::config(format!("Unknown provider '{}'", provider)));
        }

        let model = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;

        let endpoint = self
            .endpoint
            .or_else(|| default_endpoint(&provider).map(|s| s.to_string()))
            .ok_or_else(|| {
                Error::config(format!("endpoint is required for provider '{}'", provider))
            })?;

        Ok(ApiConfig {
            provider,
            endpoint,
            api_key: self.api_key.unwrap_or_default(),
            model,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(defaults.presence_penalty),
            system_prompt: self.system_prompt.unwrap_or_default(),
            api_version: self.api_version,
        })
    }
}

/// Stored credentials for one provider name
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Engine-level options that are not part of a single model call
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Hard cap on model round-trips per user submission
    pub max_iterations: u32,

    /// Connect timeout for HTTP requests, in seconds. Bodies are never
    /// time-limited; callers bound a turn by cancelling it.
    pub connect_timeout: Option<u64>,

    /// Retry policy for opening a provider stream
    pub retry: RetryConfig,

    /// Route tool HTTP calls through this passthrough proxy
    pub proxy_url: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            connect_timeout: None,
            retry: RetryConfig::default().with_max_attempts(1),
            proxy_url: None,
        }
    }
}

impl OrchestratorOptions {
    pub fn builder() -> OrchestratorOptionsBuilder {
        OrchestratorOptionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct OrchestratorOptionsBuilder {
    max_iterations: Option<u32>,
    connect_timeout: Option<u64>,
    retry: Option<RetryConfig>,
    proxy_url: Option<String>,
}

impl OrchestratorOptionsBuilder {
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<OrchestratorOptions> {
        let defaults = OrchestratorOptions::default();
        let max_iterations = self.max_iterations.unwrap_or(defaults.max_iterations);
        if max_iterations == 0 {
            return Err(Error::config("max_iterations must be at least 1"));
        }
        let retry = self.retry.unwrap_or(defaults.retry);
        if retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }

        Ok(OrchestratorOptions {
            max_iterations,
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            retry,
            proxy_url: self.proxy_url,
        })
    }
}
