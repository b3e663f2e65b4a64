//! In-memory file tree store with write-through persistence.
//!
//! The store is the single writable source of truth for file content. It is
//! mutated from three uncoordinated sources (local edits, backend fetch,
//! agent merges) with last-writer-wins semantics at path granularity. Every
//! mutation triggers persistence through a [`PersistTree`] hook; a failed
//! write-back is reported to the caller but never rolls the local mutation
//! back.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{RwLock, watch};

use atrium_protocol::FileTree;

use crate::error::PersistenceError;

/// Write-through persistence hook invoked on every store mutation.
#[async_trait]
pub trait PersistTree: Send + Sync {
    /// Overwrite the server-side copy of `tree` for `project_id`.
    async fn persist(&self, project_id: &str, tree: &FileTree) -> Result<(), PersistenceError>;
}

/// Persistence hook that drops every write. For sessions without a backend.
#[derive(Debug, Default)]
pub struct DiscardPersist;

#[async_trait]
impl PersistTree for DiscardPersist {
    async fn persist(&self, _project_id: &str, _tree: &FileTree) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// The in-memory file tree store.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct FileTreeStore {
    project_id: String,
    inner: Arc<RwLock<FileTree>>,
    snapshot_tx: Arc<watch::Sender<FileTree>>,
    persist: Arc<dyn PersistTree>,
}

impl FileTreeStore {
    /// Create a store seeded with `initial` (no persistence is triggered for
    /// the seed; it came from the backend in the first place).
    pub fn new(
        project_id: impl Into<String>,
        initial: FileTree,
        persist: Arc<dyn PersistTree>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(initial.clone());
        Self {
            project_id: project_id.into(),
            inner: Arc::new(RwLock::new(initial)),
            snapshot_tx: Arc::new(snapshot_tx),
            persist,
        }
    }

    /// The project this store belongs to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Snapshot of the current tree.
    pub async fn get(&self) -> FileTree {
        self.inner.read().await.clone()
    }

    /// Contents of a single file, if present.
    pub async fn read_file(&self, path: &str) -> Option<String> {
        self.inner.read().await.get(path).map(str::to_string)
    }

    /// Observe tree revisions without holding the store lock.
    pub fn subscribe(&self) -> watch::Receiver<FileTree> {
        self.snapshot_tx.subscribe()
    }

    /// Wholesale overwrite with an authoritative tree.
    ///
    /// An `Err` means the mutation applied locally but failed to persist.
    pub async fn replace(&self, tree: FileTree) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            *guard = tree;
            guard.clone()
        };
        self.after_mutation(snapshot).await
    }

    /// Create or update a single file.
    pub async fn upsert(
        &self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), PersistenceError> {
        let path = path.into();
        let snapshot = {
            let mut guard = self.inner.write().await;
            guard.insert(path.clone(), contents.into());
            guard.clone()
        };
        debug!("upserted {} in project {}", path, self.project_id);
        self.after_mutation(snapshot).await
    }

    /// Key-wise union with `partial`, incoming values winning.
    pub async fn merge(&self, partial: FileTree) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            guard.merge(partial);
            guard.clone()
        };
        self.after_mutation(snapshot).await
    }

    async fn after_mutation(&self, snapshot: FileTree) -> Result<(), PersistenceError> {
        // Observers first: the local tree is authoritative regardless of
        // what the backend says.
        self.snapshot_tx.send_replace(snapshot.clone());

        if let Err(err) = self.persist.persist(&self.project_id, &snapshot).await {
            warn!(
                "file tree for project {} not persisted: {err}",
                self.project_id
            );
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::Mutex;

    /// Records every persisted payload; can be switched to fail.
    #[derive(Default)]
    struct RecordingPersist {
        calls: Mutex<Vec<FileTree>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingPersist {
        fn calls(&self) -> Vec<FileTree> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PersistTree for RecordingPersist {
        async fn persist(
            &self,
            project_id: &str,
            tree: &FileTree,
        ) -> Result<(), PersistenceError> {
            self.calls.lock().unwrap().push(tree.clone());
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(PersistenceError {
                    project_id: project_id.to_string(),
                    source: TransportError::ChannelClosed,
                });
            }
            Ok(())
        }
    }

    fn tree(pairs: &[(&str, &str)]) -> FileTree {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_mutations_union_with_last_writer_wins() {
        let store = FileTreeStore::new("p-1", FileTree::new(), Arc::new(DiscardPersist));

        store.upsert("a.js", "one").await.unwrap();
        store.merge(tree(&[("a.js", "two"), ("b.js", "b")])).await.unwrap();
        store.upsert("c.js", "c").await.unwrap();
        store
            .replace(tree(&[("a.js", "three"), ("c.js", "c")]))
            .await
            .unwrap();

        let current = store.get().await;
        assert_eq!(current.get("a.js"), Some("three"));
        assert_eq!(current.get("b.js"), None); // replaced away
        assert_eq!(current.get("c.js"), Some("c"));
    }

    #[tokio::test]
    async fn test_every_mutation_persists_full_snapshot() {
        let persist = Arc::new(RecordingPersist::default());
        let store = FileTreeStore::new("p-1", FileTree::new(), persist.clone());

        store.upsert("a.js", "x").await.unwrap();
        store.merge(tree(&[("b.js", "y")])).await.unwrap();

        let calls = persist.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].get("a.js"), Some("x"));
        assert_eq!(calls[1].get("b.js"), Some("y"));
    }

    #[tokio::test]
    async fn test_replace_is_idempotent_including_persist_payloads() {
        let persist = Arc::new(RecordingPersist::default());
        let store = FileTreeStore::new("p-1", FileTree::new(), persist.clone());
        let authoritative = tree(&[("index.html", "<h1>hi</h1>")]);

        store.replace(authoritative.clone()).await.unwrap();
        store.replace(authoritative.clone()).await.unwrap();

        assert_eq!(store.get().await, authoritative);
        let calls = persist.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_roll_back() {
        let persist = Arc::new(RecordingPersist::default());
        persist
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let store = FileTreeStore::new("p-1", FileTree::new(), persist.clone());

        let err = store.upsert("a.js", "x").await.unwrap_err();
        assert_eq!(err.project_id, "p-1");

        // Local mutation survived the failed write-back.
        assert_eq!(store.get().await.get("a.js"), Some("x"));
    }

    #[tokio::test]
    async fn test_subscribers_observe_revisions() {
        let store = FileTreeStore::new("p-1", FileTree::new(), Arc::new(DiscardPersist));
        let mut rx = store.subscribe();

        store.upsert("a.js", "x").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().get("a.js"), Some("x"));
    }
}
