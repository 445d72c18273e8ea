//! Hook lifecycle and component attachment.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{Count, Hook, HookComponent, HookRecord, HookSummary, RECENT_HOURS};
use crate::components::{ComponentRegistry, ConfigError, Params};
use crate::store::{StorageError, Store, StoreTx, TxMode, HOOKS_BUCKET, STATS_BUCKET};

static HOOK_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid hook id regex"));

/// Errors from hook store operations.
#[derive(Error, Debug)]
pub enum HookStoreError {
    #[error("hook id must not be empty")]
    EmptyId,

    #[error("hook id {0:?} may only contain lowercase letters, digits and '-'")]
    InvalidCharacters(String),

    #[error("hook {0:?} already exists")]
    AlreadyExists(String),

    #[error("hook {0:?} not found")]
    NotFound(String),

    #[error("component {instance:?} not found on hook {hook:?}")]
    ComponentNotFound { hook: String, instance: String },

    #[error("unknown component type {0:?}")]
    UnknownComponentType(String),

    #[error("component type {component:?} is not attached to hook {hook:?}")]
    ComponentNotAttached { hook: String, component: String },

    #[error("invalid component configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HookStoreError {
    /// Whether the error was caused by the caller's input rather than by
    /// the store.
    pub fn is_client_error(&self) -> bool {
        match self {
            HookStoreError::Storage(_) => false,
            HookStoreError::Config(e) => !e.is_storage(),
            _ => true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HookStoreError::NotFound(_)
                | HookStoreError::ComponentNotFound { .. }
                | HookStoreError::ComponentNotAttached { .. }
        )
    }
}

/// Direction for [`HookStore::move_component`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("invalid direction {other:?} (expected up or down)")),
        }
    }
}

/// Hook identities, their ordered component lists and delivery counters.
#[derive(Clone)]
pub struct HookStore {
    store: Store,
    registry: Arc<ComponentRegistry>,
}

impl HookStore {
    pub fn new(store: Store, registry: Arc<ComponentRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// All hooks ordered by id, with their counters as of now.
    pub async fn list(&self) -> Result<Vec<HookSummary>, HookStoreError> {
        let now = Utc::now();
        let tx = self.store.begin(TxMode::Read).await?;
        let mut summaries = Vec::new();
        for (id, value) in tx.scan_prefix(HOOKS_BUCKET, "").await? {
            let hook = decode_hook(&id, &value)?;
            let count = count_in(&tx, &id, now).await?;
            summaries.push(HookSummary { hook, count });
        }
        Ok(summaries)
    }

    pub async fn find(&self, id: &str) -> Result<Hook, HookStoreError> {
        let tx = self.store.begin(TxMode::Read).await?;
        load_hook(&tx, id).await
    }

    /// Create an empty hook. Nothing is written when validation fails.
    pub async fn create(&self, id: &str) -> Result<Hook, HookStoreError> {
        let id = validate_hook_id(id)?;

        let tx = self.store.begin(TxMode::Write).await?;
        if tx.exists(HOOKS_BUCKET, &id).await? {
            return Err(HookStoreError::AlreadyExists(id));
        }
        let hook = Hook::new(id);
        save_hook(&tx, &hook).await?;
        tx.commit().await?;

        info!(target: "store", hook = %hook.id, "hook created");
        Ok(hook)
    }

    /// Remove a hook's identity. Component state and counters are kept.
    pub async fn delete(&self, id: &str) -> Result<(), HookStoreError> {
        let tx = self.store.begin(TxMode::Write).await?;
        if !tx.delete(HOOKS_BUCKET, id).await? {
            return Err(HookStoreError::NotFound(id.to_string()));
        }
        tx.commit().await?;

        info!(target: "store", hook = id, "hook deleted");
        Ok(())
    }

    /// Configure a component type for a hook and append a new instance to
    /// its chain, atomically.
    pub async fn attach_component(
        &self,
        hook_id: &str,
        type_name: &str,
        params: Params,
    ) -> Result<HookComponent, HookStoreError> {
        let component = self
            .registry
            .lookup(type_name)
            .ok_or_else(|| HookStoreError::UnknownComponentType(type_name.to_string()))?;
        let params = if component.config_template().is_some() {
            params
        } else {
            Params::new()
        };

        let tx = self.store.begin(TxMode::Write).await?;
        let mut hook = load_hook(&tx, hook_id).await?;
        component
            .init(&hook, &params, &tx.partition(type_name, &hook.id))
            .await?;

        let instance = HookComponent {
            id: next_instance_id(&hook, Utc::now()),
            name: type_name.to_string(),
        };
        hook.components.push(instance.clone());
        save_hook(&tx, &hook).await?;
        tx.commit().await?;

        info!(
            target: "store",
            hook = hook_id,
            component = type_name,
            instance = %instance.id,
            "component attached"
        );
        Ok(instance)
    }

    /// Remove one instance from a hook's chain. The type's stored
    /// configuration is left in place.
    pub async fn detach_component(
        &self,
        hook_id: &str,
        instance_id: &str,
    ) -> Result<(), HookStoreError> {
        let tx = self.store.begin(TxMode::Write).await?;
        let mut hook = load_hook(&tx, hook_id).await?;
        let before = hook.components.len();
        hook.components.retain(|c| c.id != instance_id);
        if hook.components.len() == before {
            return Err(HookStoreError::ComponentNotFound {
                hook: hook_id.to_string(),
                instance: instance_id.to_string(),
            });
        }
        save_hook(&tx, &hook).await?;
        tx.commit().await?;

        info!(target: "store", hook = hook_id, instance = instance_id, "component detached");
        Ok(())
    }

    /// Re-run a component type's configuration for a hook it is attached to.
    pub async fn reconfigure_component(
        &self,
        hook_id: &str,
        type_name: &str,
        params: Params,
    ) -> Result<(), HookStoreError> {
        let component = self
            .registry
            .lookup(type_name)
            .ok_or_else(|| HookStoreError::UnknownComponentType(type_name.to_string()))?;

        let tx = self.store.begin(TxMode::Write).await?;
        let hook = load_hook(&tx, hook_id).await?;
        if !hook.has_component_type(type_name) {
            return Err(HookStoreError::ComponentNotAttached {
                hook: hook_id.to_string(),
                component: type_name.to_string(),
            });
        }
        component
            .init(&hook, &params, &tx.partition(type_name, &hook.id))
            .await?;
        tx.commit().await?;

        info!(target: "store", hook = hook_id, component = type_name, "component reconfigured");
        Ok(())
    }

    /// Current configuration of a component type attached to a hook.
    pub async fn component_params(
        &self,
        hook_id: &str,
        type_name: &str,
    ) -> Result<BTreeMap<String, String>, HookStoreError> {
        let component = self
            .registry
            .lookup(type_name)
            .ok_or_else(|| HookStoreError::UnknownComponentType(type_name.to_string()))?;

        let tx = self.store.begin(TxMode::Read).await?;
        let hook = load_hook(&tx, hook_id).await?;
        if !hook.has_component_type(type_name) {
            return Err(HookStoreError::ComponentNotAttached {
                hook: hook_id.to_string(),
                component: type_name.to_string(),
            });
        }
        Ok(component
            .current_params(&hook, &tx.partition(type_name, &hook.id))
            .await)
    }

    /// Swap an instance with its neighbour. Moving past either end of the
    /// chain leaves it unchanged.
    pub async fn move_component(
        &self,
        hook_id: &str,
        instance_id: &str,
        direction: Direction,
    ) -> Result<Hook, HookStoreError> {
        let tx = self.store.begin(TxMode::Write).await?;
        let mut hook = load_hook(&tx, hook_id).await?;
        let index = hook
            .components
            .iter()
            .position(|c| c.id == instance_id)
            .ok_or_else(|| HookStoreError::ComponentNotFound {
                hook: hook_id.to_string(),
                instance: instance_id.to_string(),
            })?;

        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|i| *i < hook.components.len()),
        };
        if let Some(target) = target {
            hook.components.swap(index, target);
            save_hook(&tx, &hook).await?;
            tx.commit().await?;
            debug!(target: "store", hook = hook_id, instance = instance_id, ?direction, "component moved");
        }
        Ok(hook)
    }

    /// Delivery counters for the 48 hours ending at `now`.
    pub async fn count(&self, hook_id: &str, now: DateTime<Utc>) -> Result<Count, HookStoreError> {
        let tx = self.store.begin(TxMode::Read).await?;
        count_in(&tx, hook_id, now).await
    }

    /// Record one delivery in the hour containing `at` and in the lifetime
    /// total.
    pub async fn increment(&self, hook_id: &str, at: DateTime<Utc>) -> Result<(), HookStoreError> {
        let tx = self.store.begin(TxMode::Write).await?;
        tx.increment(STATS_BUCKET, &hourly_key(hook_id, at)).await?;
        tx.increment(STATS_BUCKET, &total_key(hook_id)).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn validate_hook_id(id: &str) -> Result<String, HookStoreError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(HookStoreError::EmptyId);
    }
    if !HOOK_ID_PATTERN.is_match(id) {
        return Err(HookStoreError::InvalidCharacters(id.to_string()));
    }
    Ok(id.to_string())
}

fn decode_hook(id: &str, value: &[u8]) -> Result<Hook, StorageError> {
    let record: HookRecord = serde_json::from_slice(value).map_err(|e| StorageError::Corrupt {
        bucket: HOOKS_BUCKET.to_string(),
        key: id.to_string(),
        message: e.to_string(),
    })?;
    Ok(Hook {
        id: id.to_string(),
        components: record.components,
    })
}

async fn load_hook(tx: &StoreTx, id: &str) -> Result<Hook, HookStoreError> {
    match tx.get(HOOKS_BUCKET, id).await? {
        Some(value) => Ok(decode_hook(id, &value)?),
        None => Err(HookStoreError::NotFound(id.to_string())),
    }
}

async fn save_hook(tx: &StoreTx, hook: &Hook) -> Result<(), StorageError> {
    let record = HookRecord {
        components: hook.components.clone(),
    };
    let value = serde_json::to_vec(&record).map_err(|e| StorageError::Corrupt {
        bucket: HOOKS_BUCKET.to_string(),
        key: hook.id.clone(),
        message: e.to_string(),
    })?;
    tx.put(HOOKS_BUCKET, &hook.id, &value).await
}

async fn count_in(tx: &StoreTx, hook_id: &str, now: DateTime<Utc>) -> Result<Count, HookStoreError> {
    let mut recent = Vec::with_capacity(RECENT_HOURS);
    for hours_ago in (0..RECENT_HOURS as i64).rev() {
        let hour = now - ChronoDuration::hours(hours_ago);
        recent.push(tx.get_counter(STATS_BUCKET, &hourly_key(hook_id, hour)).await?);
    }
    let total = tx.get_counter(STATS_BUCKET, &total_key(hook_id)).await?;
    Ok(Count { recent, total })
}

fn hourly_key(hook_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", hook_id, at.format("%Y-%m-%d-%H"))
}

fn total_key(hook_id: &str) -> String {
    format!("{hook_id}-total")
}

fn next_instance_id(hook: &Hook, now: DateTime<Utc>) -> String {
    let base = now.format("%Y%m%d%H%M%S%9f").to_string();
    let taken = |candidate: &str| hook.components.iter().any(|c| c.id == candidate);
    if !taken(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}
