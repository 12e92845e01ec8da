use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::fs_std::FileExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{value_as_u64, ConfigStore, StoredEntry};
use crate::error::{PanelError, PanelResult};
use crate::time::now_ms;

type Entries = BTreeMap<String, StoredEntry>;

/// JSON file store that survives restarts.
///
/// Every operation re-reads the file so edits made by another process (for
/// example the operator CLI re-enabling login) are seen on the next call.
/// Mutations hold an exclusive lock on the sibling `<file>.lock` for the whole
/// read-modify-write, so processes sharing the file never lose an update,
/// and replace the file atomically so readers need no lock.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> PanelResult<Entries> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(err) => return Err(err.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Entries::new());
        }
        let mut entries: Entries = serde_json::from_slice(&bytes).map_err(|e| {
            PanelError::Store(format!("corrupt store file {}: {e}", self.path.display()))
        })?;
        let now = now_ms();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries)
    }

    async fn save(&self, entries: &Entries) -> PanelResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| PanelError::Store(format!("store encode failed: {e}")))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| PanelError::Store(format!("store write task failed: {e}")))??;
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    async fn lock_file(&self) -> PanelResult<FileLock> {
        let path = self.lock_path();
        tokio::task::spawn_blocking(move || FileLock::acquire(&path))
            .await
            .map_err(|e| PanelError::Store(format!("store lock task failed: {e}")))?
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> PanelResult<T> {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        let mut entries = self.load().await?;
        let out = f(&mut entries);
        self.save(&entries).await?;
        Ok(out)
    }
}

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> PanelResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive().map_err(|e| {
            PanelError::Store(format!("failed to lock {}: {e}", path.display()))
        })?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(target: "store", error = %err, "store lock release failed");
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<Option<Value>>> {
        Box::pin(async move {
            let entries = self.load().await?;
            Ok(entries.get(key).map(|e| e.value.clone()))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, PanelResult<()>> {
        Box::pin(async move {
            let entry = StoredEntry::new(value, ttl, now_ms());
            self.mutate(|entries| {
                entries.insert(key.to_string(), entry);
            })
            .await
        })
    }

    fn forget<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<()>> {
        Box::pin(async move {
            self.mutate(|entries| {
                entries.remove(key);
            })
            .await
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PanelResult<u64>> {
        Box::pin(async move {
            self.mutate(|entries| {
                let next = entries
                    .get(key)
                    .and_then(|e| value_as_u64(&e.value))
                    .unwrap_or(0)
                    .saturating_add(1);
                entries.insert(key.to_string(), StoredEntry::new(Value::from(next), None, 0));
                next
            })
            .await
        })
    }
}

/// Replaces `path` with `bytes` via a sibling temp file and rename, so
/// readers see either the old or the new content, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::new(&path);
        store.put("bjs.services", json!([195, 190, 91]), None).await.unwrap();
        assert_eq!(store.increment("bjs.session.failed_attempts").await.unwrap(), 1);
        drop(store);

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get("bjs.services").await.unwrap(),
            Some(json!([195, 190, 91]))
        );
        assert_eq!(
            reopened.increment("bjs.session.failed_attempts").await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileStore::new(&path).get("k").await.unwrap_err();
        assert!(matches!(err, PanelError::Store(_)), "{err}");
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        store
            .put("k", json!(1), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        store.forget("k").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn instances_sharing_a_file_do_not_lose_increments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let first = std::sync::Arc::new(JsonFileStore::new(&path));
        let second = std::sync::Arc::new(JsonFileStore::new(&path));

        let mut tasks = Vec::new();
        for store in [first.clone(), second.clone()] {
            for _ in 0..50 {
                let store = store.clone();
                tasks.push(tokio::spawn(async move { store.increment("n").await }));
            }
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(first.get("n").await.unwrap(), Some(json!(100)));
        assert_eq!(second.get("n").await.unwrap(), Some(json!(100)));
    }

    #[tokio::test]
    async fn stale_writer_cannot_undo_a_lockout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let cli = JsonFileStore::new(&path);
        let client = JsonFileStore::new(&path);

        cli.put("bjs.session.login_toggle", json!(true), None).await.unwrap();
        client
            .put("bjs.session.login_toggle", json!(false), None)
            .await
            .unwrap();
        cli.increment("bjs.session.failed_attempts").await.unwrap();

        assert_eq!(
            cli.get("bjs.session.login_toggle").await.unwrap(),
            Some(json!(false))
        );
        assert!(path.with_file_name("store.json.lock").exists());
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
