//! Boundary to the external key/value store that owns credentials, the
//! login toggle, the failed-attempt counter, the session-valid-until marker
//! and the configured service ids.

mod file;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StoreKeys;
use crate::error::PanelResult;

pub use file::JsonFileStore;
pub(crate) use file::write_atomic;
pub use memory::MemoryStore;

/// Generic key/value store with optional expiry.
///
/// Implementations must make `increment` a single read-modify-write so
/// concurrent writers never lose a count.
pub trait ConfigStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<Option<Value>>>;

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, PanelResult<()>>;

    fn forget<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<()>>;

    /// Adds one to a counter entry (missing or non-numeric counts as 0) and
    /// returns the new value.
    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<u64>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct StoredEntry {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

impl StoredEntry {
    pub fn new(value: Value, ttl: Option<Duration>, now_ms: i64) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|ttl| now_ms.saturating_add(ttl.as_millis() as i64)),
        }
    }

    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Typed view over the store entries the panel client uses.
#[derive(Clone)]
pub struct PanelSettings {
    store: Arc<dyn ConfigStore>,
    keys: StoreKeys,
}

impl std::fmt::Debug for PanelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSettings")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl PanelSettings {
    pub fn new(store: Arc<dyn ConfigStore>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    /// Both values present and non-empty, otherwise `None`.
    pub async fn credentials(&self) -> PanelResult<Option<Credentials>> {
        let username = self.string(&self.keys.username).await?;
        let password = self.string(&self.keys.password).await?;
        Ok(match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials { username, password })
            }
            _ => None,
        })
    }

    pub async fn set_credentials(&self, credentials: &Credentials) -> PanelResult<()> {
        self.store
            .put(&self.keys.username, Value::from(credentials.username.clone()), None)
            .await?;
        self.store
            .put(&self.keys.password, Value::from(credentials.password.clone()), None)
            .await
    }

    pub async fn login_enabled(&self) -> PanelResult<bool> {
        let value = self.store.get(&self.keys.login_toggle).await?;
        Ok(value.as_ref().map_or(false, value_as_bool))
    }

    pub async fn disable_login(&self) -> PanelResult<()> {
        self.store
            .put(&self.keys.login_toggle, Value::Bool(false), None)
            .await
    }

    /// Operator re-enable after a lockout; the client itself never calls this.
    pub async fn enable_login(&self) -> PanelResult<()> {
        self.store
            .put(&self.keys.login_toggle, Value::Bool(true), None)
            .await
    }

    pub async fn failed_attempts(&self) -> PanelResult<u64> {
        let value = self.store.get(&self.keys.failed_attempts).await?;
        Ok(value.as_ref().and_then(value_as_u64).unwrap_or(0))
    }

    pub async fn record_failed_attempt(&self) -> PanelResult<u64> {
        self.store.increment(&self.keys.failed_attempts).await
    }

    pub async fn reset_failed_attempts(&self) -> PanelResult<()> {
        self.store
            .put(&self.keys.failed_attempts, Value::from(0u64), None)
            .await
    }

    pub async fn session_valid_until_ms(&self) -> PanelResult<Option<i64>> {
        let value = self.store.get(&self.keys.session_valid_until).await?;
        Ok(value.as_ref().and_then(Value::as_i64))
    }

    pub async fn mark_session_valid(&self, now_ms: i64, ttl: Duration) -> PanelResult<()> {
        let until = now_ms.saturating_add(ttl.as_millis() as i64);
        self.store
            .put(&self.keys.session_valid_until, Value::from(until), Some(ttl))
            .await
    }

    pub async fn invalidate_session(&self) -> PanelResult<()> {
        self.store.forget(&self.keys.session_valid_until).await
    }

    /// Configured remote service ids, in stored order.
    pub async fn services(&self) -> PanelResult<Vec<u64>> {
        let value = self.store.get(&self.keys.services).await?;
        let Some(Value::Array(items)) = value else {
            return Ok(Vec::new());
        };
        Ok(items.iter().filter_map(value_as_u64).collect())
    }

    pub async fn set_services(&self, services: &[u64]) -> PanelResult<()> {
        self.store
            .put(&self.keys.services, Value::from(services.to_vec()), None)
            .await
    }

    async fn string(&self, key: &str) -> PanelResult<Option<String>> {
        let value = self.store.get(key).await?;
        Ok(match value {
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// Toggles written by other tools arrive as bools, 0/1 or strings.
fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map_or(false, |n| n != 0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => false,
    }
}

pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
