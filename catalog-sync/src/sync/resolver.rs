use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OnceCell};

use super::error::SyncError;
use super::remote::{RemoteNode, RemoteTree};

type Slot = Arc<OnceCell<Option<RemoteNode>>>;

/// Per-run, read-through memo of path lookups.
///
/// Concurrent `resolve` calls for the same path share one remote lookup.
/// Absent paths are memoized too. Failed lookups are not, so the next call
/// asks the remote again. Any mutation at a path must be followed by
/// `invalidate` for that path.
pub struct PathResolver<'a, R: ?Sized> {
    remote: &'a R,
    language: String,
    memo: Mutex<HashMap<String, Slot>>,
    lookups: AtomicUsize,
}

impl<'a, R: RemoteTree + ?Sized> PathResolver<'a, R> {
    pub fn new(remote: &'a R, language: impl Into<String>) -> Self {
        Self {
            remote,
            language: language.into(),
            memo: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn remote(&self) -> &'a R {
        self.remote
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub async fn resolve(&self, path: &str) -> Result<Option<RemoteNode>, SyncError> {
        let slot = {
            let mut memo = self.memo.lock().await;
            Arc::clone(memo.entry(path.to_string()).or_default())
        };
        let node = slot
            .get_or_try_init(|| async {
                self.lookups.fetch_add(1, Ordering::Relaxed);
                self.remote.lookup(path, &self.language).await
            })
            .await?;
        Ok(node.clone())
    }

    pub async fn invalidate(&self, path: &str) {
        if self.memo.lock().await.remove(path).is_some() {
            tracing::trace!(path, "resolver entry invalidated");
        }
    }

    /// Never cached: callers act destructively on the answer.
    pub async fn list_children(&self, path: &str) -> Result<Vec<RemoteNode>, SyncError> {
        self.remote.list_children(path, &self.language).await
    }

    /// Remote lookups issued so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}
