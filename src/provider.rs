//! Provider clients for chat-completion APIs.
//!
//! Every provider exposes the same two capabilities through [`ChatProvider`]:
//! a single request/response call and a streaming call yielding raw
//! [`ChunkEvent`](crate::types::ChunkEvent)s. Two wire variants ship with the crate:
//!
//! | Variant | URL | Auth header |
//! |---|---|---|
//! | [`OpenAiProvider`] | `{endpoint}/chat/completions` | `Authorization: Bearer <key>` |
//! | [`AzureOpenAiProvider`] | `{endpoint}/openai/deployments/{model}/chat/completions?api-version=..` | `api-key: <key>` |
//!
//! Request and event shapes are identical between the two. Provider names
//! map to a variant through a static table; [`create_provider`] is the only
//! place that looks at it. Adding a variant means implementing
//! [`ChatProvider`] and adding one row to `REGISTRY`.
//!
//! # Example
//!
//! ```rust,no_run
//! use chat_playground::{ApiConfig, Message, create_provider};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApiConfig::builder()
//!     .provider("openai")
//!     .api_key("sk-...")
//!     .model("gpt-4o-mini")
//!     .build()?;
//!
//! let provider = create_provider(&config, reqwest::Client::new())?;
//! let mut stream = provider
//!     .stream_chat_completion(&[Message::user("Hello!")], &[])
//!     .await?;
//!
//! while let Some(event) = stream.next().await {
//!     if let Some(text) = event?.content {
//!         print!("{}", text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{ApiConfig, ProviderKind, known_providers};
use crate::stream::{ChunkStream, parse_sse_stream};
use crate::types::{Message, MessageRole, ToolCall};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One chat-completion backend.
///
/// `tools` are OpenAI function schemas, sent verbatim. An empty slice means
/// the request carries no `tools` field at all.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name this instance was created for
    fn provider_id(&self) -> &str;

    /// Single request/response; returns the assistant's text
    async fn chat_completion(&self, messages: &[Message], tools: &[Value]) -> Result<String>;

    /// Streaming request; the returned sequence is finite and cannot be restarted
    async fn stream_chat_completion(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<ChunkStream>;

    /// Model (or deployment) ids the endpoint offers
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

type Constructor = fn(ApiConfig, reqwest::Client) -> Arc<dyn ChatProvider>;

static REGISTRY: &[(ProviderKind, Constructor)] = &[
    (ProviderKind::OpenAiCompatible, openai_compatible),
    (ProviderKind::AzureOpenAi, azure_openai),
];

fn openai_compatible(config: ApiConfig, http: reqwest::Client) -> Arc<dyn ChatProvider> {
    Arc::new(OpenAiProvider::new(config, http))
}

fn azure_openai(config: ApiConfig, http: reqwest::Client) -> Arc<dyn ChatProvider> {
    Arc::new(AzureOpenAiProvider::new(config, http))
}

/// Provider names accepted by [`create_provider`]
pub fn supported_providers() -> Vec<&'static str> {
    known_providers()
}

/// Build the provider for `config.provider`.
///
/// The config is validated first, so a missing key or endpoint surfaces here
/// as [`Error::Config`] before any network I/O.
pub fn create_provider(config: &ApiConfig, http: reqwest::Client) -> Result<Arc<dyn ChatProvider>> {
    config.validate()?;
    let kind = config.kind()?;
    let constructor = REGISTRY
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, c)| *c)
        .ok_or_else(|| Error::config(format!("No client for provider '{}'", config.provider)))?;
    Ok(constructor(config.clone(), http))
}

/// HTTP client shared by providers and tools.
///
/// Only connecting is time-limited; a stream may run as long as chunks arrive.
pub fn build_http_client(connect_timeout_secs: Option<u64>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    builder.build().map_err(Error::Http)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCall]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        let tool_calls = (msg.role == MessageRole::Assistant && msg.has_tool_calls())
            .then_some(msg.tool_calls.as_slice());
        // assistant turns that only call tools carry null content
        let content = if tool_calls.is_some() && msg.content.is_empty() {
            None
        } else {
            Some(msg.content.as_str())
        };
        WireMessage {
            role: msg.role.as_str(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }
}

impl<'a> ChatRequest<'a> {
    fn new(config: &'a ApiConfig, messages: &'a [Message], tools: &'a [Value], stream: bool) -> Self {
        let tools = (!tools.is_empty()).then_some(tools);
        ChatRequest {
            model: &config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            stream,
            tool_choice: tools.map(|_| "auto"),
            tools,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// URL and auth shape of one wire variant
trait WireShape: Send + Sync {
    fn config(&self) -> &ApiConfig;

    fn http(&self) -> &reqwest::Client;

    fn url(&self) -> String;

    fn models_url(&self) -> String;

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

async fn post_chat<W: WireShape + ?Sized>(
    wire: &W,
    messages: &[Message],
    tools: &[Value],
    stream: bool,
) -> Result<reqwest::Response> {
    let config = wire.config();
    let body = ChatRequest::new(config, messages, tools, stream);

    log::debug!(
        "Chat request to {} (model={}, messages={}, tools={}, stream={})",
        config.provider,
        config.model,
        messages.len(),
        tools.len(),
        stream
    );

    let response = wire
        .authorize(wire.http().post(wire.url()))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(Error::Http)?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_else(|e| {
            log::warn!("Failed to read error response body: {}", e);
            "Unknown error (failed to read response body)".to_string()
        });
        return Err(Error::api(status, body));
    }

    Ok(response)
}

async fn complete<W: WireShape + ?Sized>(
    wire: &W,
    messages: &[Message],
    tools: &[Value],
) -> Result<String> {
    let response = post_chat(wire, messages, tools, false).await?;
    let text = response.text().await.map_err(Error::Http)?;
    let parsed: CompletionResponse = serde_json::from_str(&text)
        .map_err(|e| Error::malformed(format!("Invalid completion body: {}", e)))?;

    let message = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .ok_or_else(|| Error::malformed("Response has no choices[0].message"))?;

    Ok(message.content.unwrap_or_default())
}

async fn stream<W: WireShape + ?Sized>(
    wire: &W,
    messages: &[Message],
    tools: &[Value],
) -> Result<ChunkStream> {
    let response = post_chat(wire, messages, tools, true).await?;
    Ok(parse_sse_stream(response))
}

async fn models<W: WireShape + ?Sized>(wire: &W) -> Result<Vec<String>> {
    let response = wire
        .authorize(wire.http().get(wire.models_url()))
        .send()
        .await
        .map_err(Error::Http)?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(status, body));
    }

    let text = response.text().await.map_err(Error::Http)?;
    let list: ModelList = serde_json::from_str(&text)
        .map_err(|e| Error::malformed(format!("Invalid model list: {}", e)))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    config: ApiConfig,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ApiConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

impl WireShape for OpenAiProvider {
    fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.config.endpoint.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.config.api_key))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider
    }

    async fn chat_completion(&self, messages: &[Message], tools: &[Value]) -> Result<String> {
        complete(self, messages, tools).await
    }

    async fn stream_chat_completion(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<ChunkStream> {
        stream(self, messages, tools).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        models(self).await
    }
}

/// Azure OpenAI deployment; `config.model` is the deployment name
#[derive(Debug, Clone)]
pub struct AzureOpenAiProvider {
    config: ApiConfig,
    http: reqwest::Client,
}

impl AzureOpenAiProvider {
    pub fn new(config: ApiConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

impl WireShape for AzureOpenAiProvider {
    fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
            self.config.api_version()
        )
    }

    fn models_url(&self) -> String {
        format!(
            "{}/openai/deployments?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.api_version()
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("api-key", &self.config.api_key)
    }
}

#[async_trait]
impl ChatProvider for AzureOpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider
    }

    async fn chat_completion(&self, messages: &[Message], tools: &[Value]) -> Result<String> {
        complete(self, messages, tools).await
    }

    async fn stream_chat_completion(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<ChunkStream> {
        stream(self, messages, tools).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        models(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(provider: &str) -> ApiConfig {
        ApiConfig::builder()
            .provider(provider)
            .endpoint("https://example.test/v1/")
            .api_key("secret")
            .model("gpt-4o")
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_without_tools_omits_fields() {
        let cfg = config("openai");
        let messages = vec![Message::user("hi")];
        let body = serde_json::to_value(ChatRequest::new(&cfg, &messages, &[], true)).unwrap();

        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_request_with_tools_sends_schema_verbatim() {
        let cfg = config("openai");
        let schema = json!({"type": "function", "function": {"name": "f", "parameters": {"type": "object"}}});
        let tools = vec![schema.clone()];
        let body = serde_json::to_value(ChatRequest::new(&cfg, &[], &tools, false)).unwrap();

        assert_eq!(body["tools"][0], schema);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["top_p"], 1.0);
    }

    #[test]
    fn test_wire_message_shapes() {
        let call = ToolCall::new("call_1", "get_weather", "{\"city\":\"Paris\"}");
        let assistant = Message::assistant_with_tool_calls("", vec![call]);
        let wire = serde_json::to_value(WireMessage::from(&assistant)).unwrap();
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "get_weather");

        let tool_msg = Message::tool("call_1", "get_weather", "{\"temp\":20}");
        let wire = serde_json::to_value(WireMessage::from(&tool_msg)).unwrap();
        assert_eq!(
            wire,
            json!({"role": "tool", "content": "{\"temp\":20}", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn test_urls_per_variant() {
        let openai = OpenAiProvider::new(config("openai"), reqwest::Client::new());
        assert_eq!(openai.url(), "https://example.test/v1/chat/completions");

        let mut azure_cfg = config("azure");
        azure_cfg.endpoint = "https://res.openai.azure.com".to_string();
        azure_cfg.api_version = Some("2024-06-01".to_string());
        let azure = AzureOpenAiProvider::new(azure_cfg, reqwest::Client::new());
        assert_eq!(
            azure.url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_create_provider_dispatch() {
        let provider = create_provider(&config("groq"), reqwest::Client::new()).unwrap();
        assert_eq!(provider.provider_id(), "groq");

        let provider = create_provider(&config("azure-openai"), reqwest::Client::new()).unwrap();
        assert_eq!(provider.provider_id(), "azure-openai");

        let mut missing_key = config("openai");
        missing_key.api_key.clear();
        let err = create_provider(&missing_key, reqwest::Client::new()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let mut unknown = config("openai");
        unknown.provider = "nope".to_string();
        assert!(create_provider(&unknown, reqwest::Client::new()).is_err());
    }

    #[test]
    fn test_supported_providers_lists_both_variants() {
        let names = supported_providers();
        assert!(names.contains(&"openai"));
        assert!(names.contains(&"azure"));
    }
}
