//! Passthrough proxy envelope for tool HTTP calls.
//!
//! When a tool endpoint cannot be reached directly, the invoker wraps the
//! request in a [`ProxyRequest`] and POSTs it to a proxy, which replays it
//! and answers with a [`ProxyResponse`]. [`forward`] is the proxy side of that
//! exchange; any HTTP server can mount it as its handler.
//!
//! ```text
//! POST /proxy  {method, url, headers, data}
//!   -> 400 {error, message}           method/url missing, or url not http(s)
//!   -> 500 {error, message}           upstream request could not be made
//!   -> {status, statusText, headers, data}   upstream status and body preserved
//! ```
//!
//! `data` in a response keeps the upstream body type: JSON bodies arrive as
//! JSON values, anything else as a JSON string holding the raw text.

use crate::tools::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProxyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Value,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn failure(status: u16, error: &str, message: impl Into<String>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        ProxyResponse {
            status,
            status_text,
            headers: BTreeMap::new(),
            data: json!({ "error": error, "message": message.into() }),
        }
    }

    /// Body as text: strings verbatim, any other JSON re-serialized compactly
    pub fn body_text(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl ProxyRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        ProxyRequest {
            method: Some(method.as_str().to_string()),
            url: Some(url.into()),
            headers: BTreeMap::new(),
            data: None,
        }
    }

    /// Method and URL, or the 400 response to send back
    pub fn validate(&self) -> std::result::Result<(HttpMethod, &str), ProxyResponse> {
        let (Some(method), Some(url)) = (self.method.as_deref(), self.url.as_deref()) else {
            return Err(ProxyResponse::failure(
                400,
                "Bad Request",
                "Both method and url are required",
            ));
        };
        let Some(method) = HttpMethod::parse(method) else {
            return Err(ProxyResponse::failure(
                400,
                "Bad Request",
                format!("Unsupported method '{}'", method),
            ));
        };
        let lower = url.trim_start().to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(ProxyResponse::failure(
                400,
                "Bad Request",
                "url must use http:// or https://",
            ));
        }
        Ok((method, url.trim()))
    }
}

/// Read a response body, keeping JSON as JSON and everything else as text
pub(crate) fn body_value(content_type: Option<&str>, text: String) -> Value {
    let declared_json = content_type.is_some_and(|ct| ct.contains("json"));
    if declared_json || text.trim_start().starts_with(['{', '[']) {
        if let Ok(value) = serde_json::from_str(&text) {
            return value;
        }
    }
    Value::String(text)
}

/// Replay `request` against its target and wrap the outcome.
pub async fn forward(http: &reqwest::Client, request: &ProxyRequest) -> ProxyResponse {
    let (method, url) = match request.validate() {
        Ok(target) => target,
        Err(rejection) => return rejection,
    };

    let mut builder = http.request(method.into(), url);
    for (key, value) in &request.headers {
        builder = builder.header(key, value);
    }
    if let Some(data) = &request.data {
        builder = match data {
            Value::String(text) => builder.body(text.clone()),
            other => builder.json(other),
        };
    }

    log::debug!("Proxying {} {}", method.as_str(), url);

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Proxy request to {} failed: {}", url, e);
            return ProxyResponse::failure(500, "Proxy request failed", e.to_string());
        }
    };

    let status = response.status();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let content_type = headers.get("content-type").cloned();

    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return ProxyResponse::failure(500, "Proxy request failed", e.to_string()),
    };

    ProxyResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        data: body_value(content_type.as_deref(), text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_fields() {
        let request = ProxyRequest {
            url: Some("https://api.x".to_string()),
            ..Default::default()
        };
        let rejection = request.validate().unwrap_err();
        assert_eq!(rejection.status, 400);
        assert!(rejection.data["error"].is_string());
        assert!(rejection.data["message"].is_string());
    }

    #[test]
    fn test_validate_rejects_non_http_scheme() {
        for url in ["ftp://files.x/a", "file:///etc/passwd", "api.x/path"] {
            let request = ProxyRequest::new(HttpMethod::Get, url);
            assert_eq!(request.validate().unwrap_err().status, 400, "{url}");
        }
    }

    #[test]
    fn test_validate_accepts_http_and_https() {
        let request = ProxyRequest::new(HttpMethod::Post, "HTTPS://api.x/a");
        let (method, url) = request.validate().unwrap();
        assert_eq!(method, HttpMethod::Post);
        assert_eq!(url, "HTTPS://api.x/a");
    }

    #[test]
    fn test_body_value_keeps_type() {
        assert_eq!(
            body_value(Some("application/json"), "{\"a\":1}".to_string()),
            json!({"a": 1})
        );
        assert_eq!(
            body_value(Some("text/plain"), "hello".to_string()),
            json!("hello")
        );
        assert_eq!(
            body_value(Some("application/json"), "not json".to_string()),
            json!("not json")
        );
        assert_eq!(body_value(None, "[1,2]".to_string()), json!([1, 2]));
    }

    #[test]
    fn test_envelope_field_names() {
        let response = ProxyResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: BTreeMap::new(),
            data: json!("plain"),
        };
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["statusText"], "OK");
        assert_eq!(response.body_text(), "plain");
    }
}
