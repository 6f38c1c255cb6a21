//! Storage collaborator
//!
//! The engine never owns persistence. This module defines the async key-value
//! interface it expects from whoever does ([`Store`]), typed helpers over it,
//! and [`MemoryStore`], an in-process implementation used by tests and
//! embedders that do not need durability.
//!
//! The orchestrator only ever reads through this interface (see
//! [`load_catalog`]); new messages and executions are returned to the caller
//! to persist.

use crate::agent::Agent;
use crate::auth::Authorization;
use crate::config::ProviderConfig;
use crate::tools::Tool;
use crate::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Record families kept by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Sessions,
    Agents,
    Tools,
    Authorizations,
    ProviderConfigs,
    AvailableModels,
}

/// Async key-value store, one namespace per [`Collection`].
///
/// `list` returns records in insertion order; replacing a record keeps its
/// position. Resolution rules that say "first match" rely on that order.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    async fn put(&self, collection: Collection, id: &str, value: Value) -> Result<()>;

    /// Returns whether a record was removed
    async fn delete(&self, collection: Collection, id: &str) -> Result<bool>;

    async fn list(&self, collection: Collection) -> Result<Vec<Value>>;
}

/// A type stored in one collection under its own id
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn record_id(&self) -> &str;
}

impl Record for Tool {
    const COLLECTION: Collection = Collection::Tools;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Agent {
    const COLLECTION: Collection = Collection::Agents;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Authorization {
    const COLLECTION: Collection = Collection::Authorizations;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for ProviderConfig {
    const COLLECTION: Collection = Collection::ProviderConfigs;

    fn record_id(&self) -> &str {
        &self.provider
    }
}

impl Record for Session {
    const COLLECTION: Collection = Collection::Sessions;

    fn record_id(&self) -> &str {
        &self.id
    }
}

pub async fn get_record<T: Record>(store: &dyn Store, id: &str) -> Result<Option<T>> {
    match store.get(T::COLLECTION, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn put_record<T: Record>(store: &dyn Store, record: &T) -> Result<()> {
    let value = serde_json::to_value(record)?;
    store.put(T::COLLECTION, record.record_id(), value).await
}

pub async fn delete_record<T: Record>(store: &dyn Store, id: &str) -> Result<bool> {
    store.delete(T::COLLECTION, id).await
}

/// All records of a type. Entries that fail to deserialize are skipped with a warning.
pub async fn list_records<T: Record>(store: &dyn Store) -> Result<Vec<T>> {
    let values = store.list(T::COLLECTION).await?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unreadable {:?} record: {}", T::COLLECTION, e);
                None
            }
        })
        .collect())
}

/// In-memory [`Store`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|entries| entries.iter().find(|(key, _)| key == id))
            .map(|(_, value)| value.clone()))
    }

    async fn put(&self, collection: Collection, id: &str, value: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection).or_default();
        match entries.iter_mut().find(|(key, _)| key == id) {
            Some(entry) => entry.1 = value,
            None => entries.push((id.to_string(), value)),
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(entries) = collections.get_mut(&collection) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(key, _)| key != id);
        Ok(entries.len() != before)
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|entries| entries.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default())
    }
}

/// A chat session as the caller persists it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Session-level system prompt override, highest precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            agent_id: None,
            system_prompt: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append new transcript entries; existing ones are never touched
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }
}

/// Read-only definitions a turn works against
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub agent: Option<Agent>,
    pub tools: Vec<Tool>,
    pub authorizations: Vec<Authorization>,
}

/// Snapshot the agent, tools and authorizations for one turn.
///
/// Asking for an agent id that does not exist is an error; running without
/// an agent is `agent_id = None`.
pub async fn load_catalog(store: &dyn Store, agent_id: Option<&str>) -> Result<Catalog> {
    let agent = match agent_id {
        Some(id) => Some(
            get_record::<Agent>(store, id)
                .await?
                .ok_or_else(|| Error::invalid_input(format!("Agent '{}' not found", id)))?,
        ),
        None => None,
    };

    Ok(Catalog {
        agent,
        tools: list_records(store).await?,
        authorizations: list_records(store).await?,
    })
}
