//! Tool invocation
//!
//! [`ToolInvoker::invoke`] turns one model-issued [`ToolCall`] into one HTTP
//! request against the tool's bound endpoint and returns the response body as
//! a string. Tools without a binding are simulated.
//!
//! Request construction, for a call with arguments `{"city": "NYC", "units": "c"}`
//! against `GET https://api.x/{city}`:
//!
//! 1. arguments must parse to a JSON object
//! 2. `{param}` placeholders in the URL and header values are filled from the
//!    arguments; unknown placeholders stay as literal text
//! 3. headers are merged with the resolved authorization (authorization wins)
//! 4. `GET`/`DELETE` append the arguments no placeholder used as query
//!    parameters (`https://api.x/NYC?units=c`); `POST`/`PUT`/`PATCH` send the
//!    whole argument object as a JSON body
//!
//! There is exactly one network call per invocation and no retry.

use crate::auth::{Authorization, merge_headers};
use crate::error::ToolExecutionError;
use crate::proxy::{ProxyRequest, ProxyResponse, body_value};
use crate::tools::{Header, HttpMethod, Tool};
use crate::types::ToolCall;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::LazyLock;

type InvokeResult = std::result::Result<String, ToolExecutionError>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Longest slice of an error body kept in a `RequestFailed` message
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct ToolInvoker {
    http: reqwest::Client,
    proxy_url: Option<String>,
}

/// Fully resolved request, ready to send directly or through the proxy
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<Header>,
    pub body: Option<Value>,
}

impl ToolInvoker {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            proxy_url: None,
        }
    }

    /// Send every tool request through the passthrough proxy at `url`
    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub async fn invoke(
        &self,
        tool: &Tool,
        call: &ToolCall,
        authorization: Option<&Authorization>,
    ) -> InvokeResult {
        if tool.http_request.is_none() {
            return Ok(simulate(tool, call));
        }

        let prepared = prepare_request(tool, call, authorization)?;
        log::debug!(
            "Invoking tool '{}': {} {}{}",
            tool.name,
            prepared.method.as_str(),
            prepared.url,
            if self.proxy_url.is_some() { " (via proxy)" } else { "" }
        );

        match &self.proxy_url {
            Some(proxy_url) => self.send_via_proxy(proxy_url, prepared).await,
            None => self.send_direct(prepared).await,
        }
    }

    async fn send_direct(&self, prepared: PreparedRequest) -> InvokeResult {
        let mut builder = self.http.request(prepared.method.into(), &prepared.url);
        for header in &prepared.headers {
            builder = builder.header(&header.key, &header.value);
        }
        if let Some(body) = &prepared.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ToolExecutionError::request_failed(None, e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| ToolExecutionError::request_failed(Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            return Err(ToolExecutionError::request_failed(
                Some(status.as_u16()),
                truncate(&text),
            ));
        }

        Ok(stringify_body(body_value(content_type.as_deref(), text)))
    }

    async fn send_via_proxy(&self, proxy_url: &str, prepared: PreparedRequest) -> InvokeResult {
        let mut envelope = ProxyRequest::new(prepared.method, prepared.url);
        envelope.headers = prepared
            .headers
            .into_iter()
            .map(|h| (h.key, h.value))
            .collect();
        envelope.data = prepared.body;

        let response = self
            .http
            .post(proxy_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| ToolExecutionError::request_failed(None, e.to_string()))?;

        let transport_status = response.status().as_u16();
        let proxied: ProxyResponse = response.json().await.map_err(|e| {
            ToolExecutionError::request_failed(
                Some(transport_status),
                format!("Invalid proxy response: {}", e),
            )
        })?;

        if !proxied.is_success() {
            return Err(ToolExecutionError::request_failed(
                Some(proxied.status),
                truncate(&proxied.body_text()),
            ));
        }

        Ok(proxied.body_text())
    }
}

/// Parse, substitute and merge everything a live tool call needs.
pub fn prepare_request(
    tool: &Tool,
    call: &ToolCall,
    authorization: Option<&Authorization>,
) -> std::result::Result<PreparedRequest, ToolExecutionError> {
    let template = tool.http_request.as_ref().ok_or_else(|| {
        ToolExecutionError::request_failed(None, format!("Tool '{}' has no HTTP binding", tool.name))
    })?;
    let args = parse_arguments(call.arguments())?;

    let mut used = HashSet::new();
    let url = substitute(&template.url, &args, &mut used);
    let headers: Vec<Header> = merge_headers(tool, authorization)
        .into_iter()
        .map(|h| {
            let value = substitute(&h.value, &args, &mut used);
            Header::new(h.key, value)
        })
        .collect();

    let (url, body) = if template.method.has_body() {
        (url, Some(Value::Object(args)))
    } else {
        (append_query(&url, &args, &used)?, None)
    };

    Ok(PreparedRequest {
        method: template.method,
        url,
        headers,
        body,
    })
}

fn parse_arguments(raw: &str) -> std::result::Result<Map<String, Value>, ToolExecutionError> {
    // models sometimes send "" for tools without parameters
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolExecutionError::invalid_arguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolExecutionError::invalid_arguments(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn arg_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fill `{name}` placeholders from `args`, recording which keys were used
pub fn substitute(template: &str, args: &Map<String, Value>, used: &mut HashSet<String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match args.get(key) {
                Some(value) => {
                    used.insert(key.to_string());
                    arg_text(value)
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn append_query(
    url: &str,
    args: &Map<String, Value>,
    used: &HashSet<String>,
) -> std::result::Result<String, ToolExecutionError> {
    let remaining: Vec<(&String, &Value)> = args
        .iter()
        .filter(|(k, v)| !used.contains(*k) && !v.is_null())
        .collect();
    if remaining.is_empty() {
        return Ok(url.to_string());
    }

    let mut parsed = reqwest::Url::parse(url).map_err(|e| {
        ToolExecutionError::request_failed(None, format!("Invalid URL '{}': {}", url, e))
    })?;
    {
        let mut query = parsed.query_pairs_mut();
        for (key, value) in remaining {
            query.append_pair(key, &arg_text(value));
        }
    }
    Ok(parsed.to_string())
}

fn stringify_body(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Placeholder result for tools with no live backend
fn simulate(tool: &Tool, call: &ToolCall) -> String {
    let arguments = serde_json::from_str::<Value>(call.arguments())
        .unwrap_or_else(|_| Value::String(call.arguments().to_string()));
    json!({
        "simulated": true,
        "tool": tool.name,
        "arguments": arguments,
        "message": format!("Tool '{}' has no HTTP endpoint configured; returning a simulated result.", tool.name),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool;

    fn call(args: &str) -> ToolCall {
        ToolCall::new("call_1", "get_weather", args)
    }

    #[test]
    fn test_simulated_tool_never_fails() {
        let sim = tool("get_weather", "Weather").param("city", "string").build();
        let out = simulate(&sim, &call("{not json"));
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["simulated"], true);
        assert_eq!(parsed["arguments"], "{not json");
    }

    #[test]
    fn test_prepare_get_substitutes_and_queries() {
        let t = tool("get_weather", "Weather")
            .get("https://api.x/{city}")
            .header("X-Units", "{units}")
            .build();
        let prepared = prepare_request(&t, &call(r#"{"city":"NYC","units":"c","days":3}"#), None).unwrap();

        assert_eq!(prepared.url, "https://api.x/NYC?days=3");
        assert_eq!(prepared.headers, vec![Header::new("X-Units", "c")]);
        assert!(prepared.body.is_none());
    }

    #[test]
    fn test_prepare_unresolved_placeholder_is_literal() {
        let t = tool("lookup", "Lookup").get("https://api.x/{id}/{missing}").build();
        let prepared = prepare_request(&t, &call(r#"{"id":7}"#), None).unwrap();
        assert_eq!(prepared.url, "https://api.x/7/{missing}");
    }

    #[test]
    fn test_prepare_post_sends_body() {
        let t = tool("create", "Create").post("https://api.x/items/{kind}").build();
        let prepared = prepare_request(&t, &call(r#"{"kind":"book","title":"Dune"}"#), None).unwrap();
        assert_eq!(prepared.url, "https://api.x/items/book");
        assert_eq!(prepared.body, Some(json!({"kind": "book", "title": "Dune"})));
    }

    #[test]
    fn test_prepare_merges_authorization_headers() {
        let t = tool("x", "X")
            .get("https://api.x")
            .header("Authorization", "tool")
            .build();
        let auth = Authorization::new("creds", vec![Header::new("Authorization", "Bearer {token}")]);
        let prepared = prepare_request(&t, &call(r#"{"token":"abc"}"#), Some(&auth)).unwrap();
        assert_eq!(prepared.headers, vec![Header::new("Authorization", "Bearer abc")]);
        // consumed by a header placeholder, so not leaked into the query
        assert_eq!(prepared.url, "https://api.x");
    }

    #[test]
    fn test_invalid_arguments() {
        let t = tool("x", "X").get("https://api.x").build();
        for bad in ["{oops", "[1,2]", "\"text\""] {
            let err = prepare_request(&t, &call(bad), None).unwrap_err();
            assert!(matches!(err, ToolExecutionError::InvalidArguments(_)), "{bad}");
        }
        assert!(prepare_request(&t, &call(""), None).is_ok());
    }

    #[test]
    fn test_truncate_long_bodies() {
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        assert_eq!(truncate(&long).len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short"), "short");
    }
}
