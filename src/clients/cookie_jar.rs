use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;

use crate::error::{PanelError, PanelResult};
use crate::store::write_atomic;

/// Cookie jar persisted to a JSON file, including session cookies, so a
/// restarted process resumes the panel session without logging in again.
#[derive(Clone)]
pub struct CookieJar {
    path: PathBuf,
    store: Arc<CookieStoreMutex>,
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar")
            .field("path", &self.path)
            .field("cookies", &self.len())
            .finish()
    }
}

impl CookieJar {
    /// Loads the jar from `path`. A missing file starts empty; an unreadable
    /// one is logged and replaced on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = match load_store(&path) {
            Ok(Some(store)) => store,
            Ok(None) => CookieStore::default(),
            Err(err) => {
                tracing::warn!(
                    target: "transport",
                    path = %path.display(),
                    error = %err,
                    "cookie jar unreadable; starting with an empty session"
                );
                CookieStore::default()
            }
        };

        Self {
            path,
            store: Arc::new(CookieStoreMutex::new(store)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared provider handed to the HTTP client.
    pub fn provider(&self) -> Arc<CookieStoreMutex> {
        self.store.clone()
    }

    pub fn len(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.iter_any().count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> PanelResult<()> {
        self.store
            .lock()
            .map_err(|_| PanelError::Store("cookie jar lock poisoned".to_string()))?
            .clear();
        self.save()
    }

    pub fn save(&self) -> PanelResult<()> {
        let mut buf = Vec::new();
        {
            let store = self
                .store
                .lock()
                .map_err(|_| PanelError::Store("cookie jar lock poisoned".to_string()))?;
            cookie_store::serde::json::save_incl_expired_and_nonpersistent(&*store, &mut buf)
                .map_err(|e| PanelError::Store(format!("cookie jar encode failed: {e}")))?;
        }
        write_atomic(&self.path, &buf)?;
        Ok(())
    }
}

fn load_store(path: &Path) -> PanelResult<Option<CookieStore>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if file.metadata().map(|m| m.len() == 0).unwrap_or(false) {
        return Ok(None);
    }
    cookie_store::serde::json::load(BufReader::new(file))
        .map(Some)
        .map_err(|e| PanelError::Store(format!("cookie jar decode failed: {e}")))
}
