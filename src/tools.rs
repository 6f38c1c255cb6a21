//! # Tool definitions
//!
//! A [`Tool`] is a stored record: an OpenAI function-calling schema, plus an
//! optional [`HttpRequestTemplate`] that binds the function to a live HTTP
//! endpoint. Tools without a template are "simulated" by the invoker.
//!
//! The schema is sent to the model verbatim, and the function name the model
//! returns is mapped back to a tool by exact match on [`Tool::name`]. The two
//! must agree; [`Tool::validate`] checks that.
//!
//! ## Schema notation
//!
//! The builder accepts the same shorthand notations for parameters and
//! normalises them to JSON Schema:
//!
//! - **Simple notation**: `{"city": "string", "days": "integer"}`
//! - **Typed schema**: `{"city": {"type": "string", "description": "City name"}}`
//! - **Full JSON Schema**: passed through unchanged
//!
//! ```rust
//! use chat_playground::tool;
//!
//! let weather = tool("get_weather", "Current weather for a city")
//!     .param("city", "string")
//!     .get("https://api.example.com/weather/{city}")
//!     .header("Accept", "application/json")
//!     .tag("weather")
//!     .build();
//!
//! assert_eq!(weather.to_openai_format()["function"]["name"], "get_weather");
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One HTTP header as stored on tools and authorizations.
///
/// Keys are compared case-sensitively when merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods whose arguments travel as a JSON body rather than a query string
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// HTTP request bound to a tool.
///
/// `url` and header values may contain `{param}` placeholders that are filled
/// from the tool call's arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpRequestTemplate {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl HttpRequestTemplate {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// A stored tool definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// OpenAI function schema: `{type: "function", function: {name, description, parameters}}`
    pub schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tool {
    /// Create a tool from a name, description and parameter schema (any of
    /// the notations the builder accepts).
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        let name = name.into();
        let description = description.into();
        let schema = function_schema(&name, &description, convert_schema_to_openai(parameters));
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            schema,
            http_request: None,
            tag: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_http_request(mut self, request: HttpRequestTemplate) -> Self {
        self.http_request = Some(request);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The schema exactly as it is sent to the model
    pub fn to_openai_format(&self) -> Value {
        self.schema.clone()
    }

    /// `schema.function.name`, if present
    pub fn function_name(&self) -> Option<&str> {
        self.schema
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
    }

    /// JSON schema of the parameters object
    pub fn parameters(&self) -> Option<&Value> {
        self.schema.get("function").and_then(|f| f.get("parameters"))
    }

    /// Tools without an HTTP binding return a synthesized result
    pub fn is_simulated(&self) -> bool {
        self.http_request.is_none()
    }

    /// Check the schema is a function schema whose name matches the tool name
    pub fn validate(&self) -> Result<()> {
        if self.schema.get("type").and_then(Value::as_str) != Some("function") {
            return Err(Error::invalid_input(format!(
                "Tool '{}' schema must have type \"function\"",
                self.name
            )));
        }
        match self.function_name() {
            Some(name) if name == self.name => Ok(()),
            Some(name) => Err(Error::invalid_input(format!(
                "Tool '{}' schema declares function '{}'",
                self.name, name
            ))),
            None => Err(Error::invalid_input(format!(
                "Tool '{}' schema is missing function.name",
                self.name
            ))),
        }
    }
}

fn function_schema(name: &str, description: &str, parameters: Value) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters
        }
    })
}

/// Normalise any of the accepted parameter notations to a JSON Schema object.
fn convert_schema_to_openai(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some(type_str) = param_type.as_str() {
            properties.insert(param_name.clone(), type_to_json_schema(type_str));
            required.push(param_name.clone());
        } else if let Some(prop_obj) = param_type.as_object() {
            let mut prop_obj = prop_obj.clone();

            // "optional" and per-property "required" are shorthand, not JSON Schema
            let is_optional = prop_obj
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
            let has_default = prop_obj.contains_key("default");

            properties.insert(param_name.clone(), Value::Object(prop_obj));

            match is_required {
                Some(true) => required.push(param_name.clone()),
                Some(false) => {}
                None if !is_optional && !has_default => required.push(param_name.clone()),
                None => {}
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        // unknown names fall back to string
        _ => "string",
    };

    serde_json::json!({ "type": json_type })
}

/// Fluent builder for [`Tool`]
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: serde_json::Map<String, Value>,
    full_schema: Option<Value>,
    http_request: Option<HttpRequestTemplate>,
    tag: Option<String>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::Map::new(),
            full_schema: None,
            http_request: None,
            tag: None,
        }
    }

    /// Replace the parameter schema entirely
    pub fn schema(mut self, schema: Value) -> Self {
        self.full_schema = Some(schema);
        self.parameters.clear();
        self
    }

    /// Add a parameter in simple type notation
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        self.full_schema = None;
        self.parameters
            .insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    /// Add a parameter with an extended property schema
    pub fn param_schema(mut self, name: &str, property: Value) -> Self {
        self.full_schema = None;
        self.parameters.insert(name.to_string(), property);
        self
    }

    pub fn http(mut self, method: HttpMethod, url: impl Into<String>) -> Self {
        let headers = self
            .http_request
            .take()
            .map(|r| r.headers)
            .unwrap_or_default();
        self.http_request = Some(HttpRequestTemplate {
            method,
            url: url.into(),
            headers,
        });
        self
    }

    pub fn get(self, url: impl Into<String>) -> Self {
        self.http(HttpMethod::Get, url)
    }

    pub fn post(self, url: impl Into<String>) -> Self {
        self.http(HttpMethod::Post, url)
    }

    /// Add a header to the HTTP binding. Ignored until `get`/`post`/`http` is set.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(request) = self.http_request.as_mut() {
            request.headers.push(Header::new(key, value));
        }
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn build(self) -> Tool {
        let parameters = self
            .full_schema
            .unwrap_or(Value::Object(self.parameters));

        let mut tool = Tool::new(self.name, self.description, parameters);
        tool.http_request = self.http_request;
        tool.tag = self.tag;
        tool
    }
}

pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}
