//! Filter settings persistence.
//!
//! The settings editor and this crate share a flat key/value store (see
//! [`crate::domain::settings::keys`]). Stores broadcast every changed key so
//! the running service can re-read the filter without polling.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANGE_BUFFER: usize = 64;

/// Storage partition a change came from. Only `Sync` carries filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Sync,
    Local,
    Managed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub key: String,
    pub new_value: Value,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored values for every key in `defaults`, falling back to the default per key.
    async fn get(&self, defaults: &Map<String, Value>) -> Result<Map<String, Value>>;

    /// Write `values` and notify subscribers of every key whose value changed.
    async fn set(&self, values: Map<String, Value>) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

fn merge_defaults(stored: &Map<String, Value>, defaults: &Map<String, Value>) -> Map<String, Value> {
    defaults
        .iter()
        .map(|(key, default)| (key.clone(), stored.get(key).cloned().unwrap_or_else(|| default.clone())))
        .collect()
}

/// Apply `values` onto `stored`, returning the changes to broadcast.
fn merge_values(stored: &mut Map<String, Value>, values: Map<String, Value>) -> Vec<StorageChange> {
    let mut changes = Vec::new();
    for (key, value) in values {
        if stored.get(&key) == Some(&value) {
            continue;
        }
        stored.insert(key.clone(), value.clone());
        changes.push(StorageChange {
            area: StorageArea::Sync,
            key,
            new_value: value,
        });
    }
    changes
}

fn publish(sender: &broadcast::Sender<StorageChange>, changes: Vec<StorageChange>) {
    for change in changes {
        // No subscribers is not an error
        let _ = sender.send(change);
    }
}

/// In-process store for hosts that persist elsewhere, and for tests.
pub struct MemorySettingsStore {
    values: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::with_values(Map::new())
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            values: Mutex::new(values),
            changes,
        }
    }

    /// Forward a change that happened outside this store (another area, another writer).
    pub fn publish_external(&self, change: StorageChange) {
        if change.area == StorageArea::Sync {
            let mut values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            values.insert(change.key.clone(), change.new_value.clone());
        }
        publish(&self.changes, vec![change]);
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values
            .lock()
            .map(|v| v.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, defaults: &Map<String, Value>) -> Result<Map<String, Value>> {
        let values = self.values.lock().map_err(|_| anyhow!("Settings lock poisoned"))?;
        Ok(merge_defaults(&values, defaults))
    }

    async fn set(&self, values: Map<String, Value>) -> Result<()> {
        let changes = {
            let mut stored = self.values.lock().map_err(|_| anyhow!("Settings lock poisoned"))?;
            merge_values(&mut stored, values)
        };
        publish(&self.changes, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Settings kept in a pretty-printed JSON object on disk.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read settings file {:?}", self.path))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!("Settings file {:?} is not a JSON object, ignoring its contents", self.path);
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, defaults: &Map<String, Value>) -> Result<Map<String, Value>> {
        let stored = self.read_all().await?;
        Ok(merge_defaults(&stored, defaults))
    }

    async fn set(&self, values: Map<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_all().await?;
        let changes = merge_values(&mut stored, values);
        if changes.is_empty() {
            debug!("Settings unchanged, skipping write");
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create settings directory")?;
        }
        let content = serde_json::to_string_pretty(&Value::Object(stored)).context("Failed to serialize settings")?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write settings file {:?}", self.path))?;
        info!("Saved {} changed setting(s) to {:?}", changes.len(), self.path);

        publish(&self.changes, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
