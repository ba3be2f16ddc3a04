//! Node-scoped key/value stores

use crate::error::{IoResultExt, Result, TuneError};
use crate::system::write_atomic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// `{ node: { key: value } }`
type Document = BTreeMap<String, BTreeMap<String, String>>;

/// Durable per-node flags
pub trait StateStore: Send + Sync {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, node: &str, key: &str, value: &str) -> Result<()>;
    fn remove(&self, node: &str, key: &str) -> Result<()>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>> {
        (**self).get(node, key)
    }

    fn set(&self, node: &str, key: &str, value: &str) -> Result<()> {
        (**self).set(node, key, value)
    }

    fn remove(&self, node: &str, key: &str) -> Result<()> {
        (**self).remove(node, key)
    }
}

fn poisoned<T>(_: T) -> TuneError {
    TuneError::StateStore("state lock poisoned".to_string())
}

/// JSON document on local disk, rewritten atomically on every change
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document> {
        if !self.path.exists() {
            return Ok(Document::new());
        }
        let content = std::fs::read_to_string(&self.path).with_path(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Document::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            TuneError::StateStore(format!("corrupt state file {}: {}", self.path.display(), e))
        })
    }

    fn save(&self, doc: &Document) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        write_atomic(&self.path, &json)
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let _guard = self.guard.lock().map_err(poisoned)?;
        let mut doc = self.load()?;
        if f(&mut doc) {
            self.save(&doc)?;
        }
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>> {
        let _guard = self.guard.lock().map_err(poisoned)?;
        Ok(self.load()?.get(node).and_then(|kv| kv.get(key)).cloned())
    }

    fn set(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.update(|doc| {
            doc.entry(node.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, node: &str, key: &str) -> Result<()> {
        self.update(|doc| {
            let Some(kv) = doc.get_mut(node) else {
                return false;
            };
            let removed = kv.remove(key).is_some();
            if kv.is_empty() {
                doc.remove(node);
            }
            removed
        })
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: Mutex<Document>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> Result<MutexGuard<'_, Document>> {
        self.data.lock().map_err(poisoned)
    }

    /// Every key of a node
    pub fn snapshot(&self, node: &str) -> BTreeMap<String, String> {
        self.data()
            .ok()
            .and_then(|doc| doc.get(node).cloned())
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>> {
        Ok(self.data()?.get(node).and_then(|kv| kv.get(key)).cloned())
    }

    fn set(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.data()?
            .entry(node.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, node: &str, key: &str) -> Result<()> {
        if let Some(kv) = self.data()?.get_mut(node) {
            kv.remove(key);
        }
        Ok(())
    }
}
