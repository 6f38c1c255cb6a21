//! Authorization resolution for HTTP-backed tools
//!
//! An [`Authorization`] is a reusable set of headers (usually credentials),
//! optionally scoped to a tag. Within a tag group (all authorizations sharing
//! one tag value, the untagged ones forming their own group) at most one is
//! the default. [`set_default`] is the only operation that changes the
//! default flag and keeps that invariant.
//!
//! # Resolution order
//!
//! ```text
//! 1. agent binding names an authorization id   -> that one, or nothing if the id is unknown
//! 2. default authorization in the tool's tag   -> first match in list order
//! 3. default authorization without a tag       -> first match in list order
//! 4. nothing
//! ```
//!
//! Everything here is pure; storage is the caller's business except for the
//! convenience wrapper [`set_default_in_store`].

use crate::agent::ToolBinding;
use crate::store::{Store, list_records, put_record};
use crate::tools::{Header, Tool};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub is_default_in_tag: bool,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl Authorization {
    pub fn new(name: impl Into<String>, headers: Vec<Header>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tag: None,
            is_default_in_tag: false,
            headers,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default_in_tag = true;
        self
    }

    /// Tag with empty strings treated as "untagged"
    pub fn group(&self) -> Option<&str> {
        normalize_tag(self.tag.as_deref())
    }
}

fn normalize_tag(tag: Option<&str>) -> Option<&str> {
    tag.map(str::trim).filter(|t| !t.is_empty())
}

/// Pick the authorization to apply to a tool call.
///
/// An explicit selection on the binding never falls back to defaults: if the
/// selected id is gone, the call runs without authorization.
pub fn resolve<'a>(
    tool: &Tool,
    all: &'a [Authorization],
    binding: Option<&ToolBinding>,
) -> Option<&'a Authorization> {
    if let Some(selected) = binding.and_then(|b| b.authorization_id.as_deref()) {
        let found = all.iter().find(|a| a.id == selected);
        if found.is_none() {
            log::warn!(
                "Authorization '{}' selected for tool '{}' does not exist",
                selected,
                tool.name
            );
        }
        return found;
    }

    let tool_tag = normalize_tag(tool.tag.as_deref());

    if tool_tag.is_some() {
        if let Some(auth) = all
            .iter()
            .find(|a| a.is_default_in_tag && a.group() == tool_tag)
        {
            return Some(auth);
        }
    }

    all.iter()
        .find(|a| a.is_default_in_tag && a.group().is_none())
}

/// Merge tool-level headers with authorization headers.
///
/// Order follows first appearance; keys are unique (case-sensitive). On a
/// collision the authorization value wins, and within one list the later
/// entry wins.
pub fn merge_headers(tool: &Tool, authorization: Option<&Authorization>) -> Vec<Header> {
    let tool_headers = tool
        .http_request
        .as_ref()
        .map(|r| r.headers.as_slice())
        .unwrap_or_default();
    let auth_headers = authorization
        .map(|a| a.headers.as_slice())
        .unwrap_or_default();

    let mut merged: Vec<Header> = Vec::with_capacity(tool_headers.len() + auth_headers.len());
    for header in tool_headers.iter().chain(auth_headers.iter()) {
        match merged.iter_mut().find(|h| h.key == header.key) {
            Some(existing) => existing.value = header.value.clone(),
            None => merged.push(header.clone()),
        }
    }
    merged
}

/// Make `authorization_id` the only default in its tag group.
///
/// Returns the records whose flag changed (the target included) so the
/// caller can persist exactly those.
pub fn set_default(authorization_id: &str, all: &mut [Authorization]) -> Result<Vec<Authorization>> {
    let group = all
        .iter()
        .find(|a| a.id == authorization_id)
        .map(|a| a.group().map(str::to_string))
        .ok_or_else(|| {
            Error::invalid_input(format!("Authorization '{}' not found", authorization_id))
        })?;

    let mut changed = Vec::new();
    for auth in all.iter_mut() {
        if auth.group() != group.as_deref() {
            continue;
        }
        let should_be_default = auth.id == authorization_id;
        if auth.is_default_in_tag != should_be_default {
            auth.is_default_in_tag = should_be_default;
            changed.push(auth.clone());
        }
    }

    log::debug!(
        "Authorization '{}' is now default for tag {:?} ({} records changed)",
        authorization_id,
        group,
        changed.len()
    );
    Ok(changed)
}

/// [`set_default`] against a store: loads every authorization, applies the
/// change and writes back each touched record.
pub async fn set_default_in_store(store: &dyn Store, authorization_id: &str) -> Result<()> {
    let mut all: Vec<Authorization> = list_records(store).await?;
    let changed = set_default(authorization_id, &mut all)?;
    for auth in &changed {
        put_record(store, auth).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool;

    fn auth(id: &str, tag: Option<&str>, default: bool) -> Authorization {
        let mut a = Authorization::new(id, vec![Header::new("Authorization", format!("Bearer {id}"))])
            .with_id(id);
        a.tag = tag.map(str::to_string);
        a.is_default_in_tag = default;
        a
    }

    fn weather_tool() -> Tool {
        tool("get_weather", "Weather")
            .get("https://api.x/{city}")
            .tag("weather")
            .build()
    }

    #[test]
    fn test_explicit_binding_wins_over_defaults() {
        let all = vec![
            auth("tagged-default", Some("weather"), true),
            auth("global-default", None, true),
            auth("chosen", Some("other"), false),
        ];
        let binding = ToolBinding::new("t").with_authorization("chosen");

        let resolved = resolve(&weather_tool(), &all, Some(&binding)).unwrap();
        assert_eq!(resolved.id, "chosen");
    }

    #[test]
    fn test_missing_explicit_binding_does_not_fall_back() {
        let all = vec![auth("tagged-default", Some("weather"), true)];
        let binding = ToolBinding::new("t").with_authorization("deleted");

        assert!(resolve(&weather_tool(), &all, Some(&binding)).is_none());
    }

    #[test]
    fn test_tag_default_before_global_default() {
        let all = vec![
            auth("global-default", None, true),
            auth("tagged", Some("weather"), false),
            auth("tagged-default", Some("weather"), true),
        ];
        let binding = ToolBinding::new("t");

        let resolved = resolve(&weather_tool(), &all, Some(&binding)).unwrap();
        assert_eq!(resolved.id, "tagged-default");
    }

    #[test]
    fn test_global_default_fallback() {
        let all = vec![
            auth("other-tag-default", Some("mail"), true),
            auth("global-default", None, true),
        ];
        let resolved = resolve(&weather_tool(), &all, None).unwrap();
        assert_eq!(resolved.id, "global-default");
    }

    #[test]
    fn test_untagged_tool_uses_global_default() {
        let untagged = tool("ping", "Ping").get("https://api.x/ping").build();
        let all = vec![
            auth("tagged-default", Some("weather"), true),
            auth("global-default", Some(""), true),
        ];
        let resolved = resolve(&untagged, &all, None).unwrap();
        assert_eq!(resolved.id, "global-default");
    }

    #[test]
    fn test_no_match_resolves_to_none() {
        let all = vec![auth("a", Some("weather"), false), auth("b", None, false)];
        assert!(resolve(&weather_tool(), &all, None).is_none());
    }

    #[test]
    fn test_duplicate_defaults_pick_first_deterministically() {
        let all = vec![
            auth("first", Some("weather"), true),
            auth("second", Some("weather"), true),
        ];
        for _ in 0..3 {
            assert_eq!(resolve(&weather_tool(), &all, None).unwrap().id, "first");
        }
    }

    #[test]
    fn test_merge_headers_authorization_overrides() {
        let t = tool("x", "X")
            .get("https://api.x")
            .header("Accept", "application/json")
            .header("Authorization", "Bearer tool-level")
            .build();
        let a = Authorization::new(
            "creds",
            vec![
                Header::new("Authorization", "Bearer secret"),
                Header::new("X-Team", "core"),
            ],
        );

        let merged = merge_headers(&t, Some(&a));
        assert_eq!(
            merged,
            vec![
                Header::new("Accept", "application/json"),
                Header::new("Authorization", "Bearer secret"),
                Header::new("X-Team", "core"),
            ]
        );
    }

    #[test]
    fn test_merge_headers_is_case_sensitive() {
        let t = tool("x", "X")
            .get("https://api.x")
            .header("authorization", "lower")
            .build();
        let a = Authorization::new("creds", vec![Header::new("Authorization", "Upper")]);

        assert_eq!(merge_headers(&t, Some(&a)).len(), 2);
    }

    #[test]
    fn test_merge_headers_idempotent() {
        let t = tool("x", "X")
            .get("https://api.x")
            .header("Accept", "text/plain")
            .header("X-Key", "tool")
            .build();
        let a = Authorization::new("creds", vec![Header::new("X-Key", "auth")]);

        let once = merge_headers(&t, Some(&a));

        let mut t2 = t.clone();
        if let Some(request) = t2.http_request.as_mut() {
            request.headers = once.clone();
        }
        let twice = merge_headers(&t2, Some(&a));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_headers_without_authorization() {
        let t = tool("x", "X").get("https://api.x").header("A", "1").build();
        assert_eq!(merge_headers(&t, None), vec![Header::new("A", "1")]);
        assert!(merge_headers(&tool("sim", "Sim").build(), None).is_empty());
    }

    #[test]
    fn test_set_default_clears_group() {
        let mut all = vec![
            auth("a", Some("weather"), true),
            auth("b", Some("weather"), true),
            auth("c", Some("weather"), false),
            auth("other", Some("mail"), true),
            auth("global", None, true),
        ];

        let changed = set_default("c", &mut all).unwrap();

        let defaults: Vec<&str> = all
            .iter()
            .filter(|a| a.group() == Some("weather") && a.is_default_in_tag)
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(defaults, vec!["c"]);
        assert!(all.iter().find(|a| a.id == "other").unwrap().is_default_in_tag);
        assert!(all.iter().find(|a| a.id == "global").unwrap().is_default_in_tag);

        let mut changed_ids: Vec<&str> = changed.iter().map(|a| a.id.as_str()).collect();
        changed_ids.sort();
        assert_eq!(changed_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_default_untagged_group() {
        let mut all = vec![auth("g1", None, true), auth("g2", Some(""), false)];
        set_default("g2", &mut all).unwrap();
        assert!(!all[0].is_default_in_tag);
        assert!(all[1].is_default_in_tag);
    }

    #[test]
    fn test_set_default_unknown_id() {
        let mut all = vec![auth("a", None, false)];
        assert!(set_default("missing", &mut all).is_err());
    }
}
