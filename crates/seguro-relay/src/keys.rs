//! Published public keys, with an optional JSON mirror on disk.
//!
//! The mirror is the only state that survives a restart. It is rewritten in
//! full after each publish; a failed write is logged and the in-memory
//! registry stays authoritative.

use dashmap::DashMap;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug)]
struct KeyMirror {
    path: PathBuf,
    // Serializes writers so two publishes cannot interleave their renames.
    write_lock: Mutex<()>,
}

#[derive(Clone, Default)]
pub struct KeyRegistry {
    keys: Arc<DashMap<String, String>>,
    mirror: Option<Arc<KeyMirror>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a registry mirrored at `path`, loading whatever it holds. A
    /// missing file starts empty; so does an unreadable one, with a warning.
    pub async fn with_mirror(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut keys = DashMap::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(stored) => {
                    info!(path = %path.display(), keys = stored.len(), "loaded key mirror");
                    keys.extend(stored);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "key mirror is corrupt, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read key mirror, starting empty"),
        }

        Self {
            keys: Arc::new(keys),
            mirror: Some(Arc::new(KeyMirror {
                path,
                write_lock: Mutex::new(()),
            })),
        }
    }

    /// Stores `pubkey` for `client_id`, replacing any earlier key. The key is
    /// expected to be validated already.
    pub async fn publish(&self, client_id: &str, pubkey: &str) {
        let replaced = self
            .keys
            .insert(client_id.to_owned(), pubkey.to_owned())
            .is_some();
        info!(client_id, replaced, "key published");

        if let Some(mirror) = &self.mirror {
            if let Err(e) = self.write_mirror(mirror).await {
                warn!(path = %mirror.path.display(), error = %e, "key mirror write failed");
            }
        }
    }

    pub fn lookup(&self, client_id: &str) -> Option<String> {
        self.keys.get(client_id).map(|k| k.value().clone())
    }

    /// All client ids with a key, sorted, minus `exclude`.
    pub fn list(&self, exclude: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .keys
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| Some(id.as_str()) != exclude)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    async fn write_mirror(&self, mirror: &KeyMirror) -> std::io::Result<()> {
        let _guard = mirror.write_lock.lock().await;
        // Snapshot under the writer lock so the last writer wins with the
        // newest state.
        let snapshot: BTreeMap<String, String> = self
            .keys
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = mirror.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &mirror.path).await
    }
}
