use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{value_as_u64, ConfigStore, StoredEntry};
use crate::error::{PanelError, PanelResult};
use crate::time::now_ms;

/// In-process store; entries are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, StoredEntry>) -> T) -> PanelResult<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| PanelError::Store("memory store lock poisoned".to_string()))?;
        let now = now_ms();
        guard.retain(|_, entry| entry.is_live(now));
        Ok(f(&mut guard))
    }
}

impl ConfigStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<Option<Value>>> {
        Box::pin(async move { self.with_map(|map| map.get(key).map(|e| e.value.clone())) })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, PanelResult<()>> {
        Box::pin(async move {
            let entry = StoredEntry::new(value, ttl, now_ms());
            self.with_map(|map| {
                map.insert(key.to_string(), entry);
            })
        })
    }

    fn forget<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<()>> {
        Box::pin(async move {
            self.with_map(|map| {
                map.remove(key);
            })
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<u64>> {
        Box::pin(async move {
            self.with_map(|map| {
                let next = map
                    .get(key)
                    .and_then(|e| value_as_u64(&e.value))
                    .unwrap_or(0)
                    .saturating_add(1);
                map.insert(key.to_string(), StoredEntry::new(Value::from(next), None, 0));
                next
            })
        })
    }
}
