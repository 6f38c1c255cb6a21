//! Available-model list with change subscription.
//!
//! One [`ModelAvailability`] owns the list. Consumers call
//! [`ModelAvailability::subscribe`] and are woken on every change, so nobody
//! has to poll storage to notice a refresh.

use crate::provider::ChatProvider;
use crate::store::{Collection, Record, Store, get_record, put_record};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::watch;

/// Persisted model list for one provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModels {
    pub provider: String,
    pub models: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Record for AvailableModels {
    const COLLECTION: Collection = Collection::AvailableModels;

    fn record_id(&self) -> &str {
        &self.provider
    }
}

#[derive(Debug)]
pub struct ModelAvailability {
    tx: watch::Sender<Vec<String>>,
}

impl Default for ModelAvailability {
    fn default() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx }
    }
}

impl ModelAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: Vec<String>) -> Self {
        let availability = Self::new();
        availability.set_models(models);
        availability
    }

    /// Replace the list. Blank and duplicate ids are dropped, order is kept.
    ///
    /// Subscribers are only notified when the list actually changed; the
    /// return value says whether it did.
    pub fn set_models(&self, models: Vec<String>) -> bool {
        let mut seen = HashSet::new();
        let cleaned: Vec<String> = models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty() && seen.insert(m.clone()))
            .collect();

        self.tx.send_if_modified(|current| {
            if *current == cleaned {
                false
            } else {
                *current = cleaned;
                true
            }
        })
    }

    pub fn models(&self) -> Vec<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }

    /// `current` if it is still offered, else the first available model.
    ///
    /// With an empty list nothing is known to be unavailable, so a non-empty
    /// `current` is kept.
    pub fn resolve_model(&self, current: &str) -> Option<String> {
        let models = self.tx.borrow();
        if models.is_empty() {
            return (!current.is_empty()).then(|| current.to_string());
        }
        if models.iter().any(|m| m == current) {
            return Some(current.to_string());
        }
        log::debug!("Model '{}' not available, falling back to '{}'", current, models[0]);
        models.first().cloned()
    }

    /// Fetch the list from the provider and publish it
    pub async fn refresh(&self, provider: &dyn ChatProvider) -> Result<Vec<String>> {
        let models = provider.list_models().await?;
        log::debug!("{} offers {} model(s)", provider.provider_id(), models.len());
        self.set_models(models);
        Ok(self.models())
    }

    pub async fn save(&self, store: &dyn Store, provider: &str) -> Result<()> {
        let record = AvailableModels {
            provider: provider.to_string(),
            models: self.models(),
            updated_at: Utc::now(),
        };
        put_record(store, &record).await
    }

    /// Publish the stored list for `provider`; returns whether one existed
    pub async fn load(&self, store: &dyn Store, provider: &str) -> Result<bool> {
        match get_record::<AvailableModels>(store, provider).await? {
            Some(record) => {
                self.set_models(record.models);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
