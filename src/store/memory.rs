//! In-memory coordination store
//!
//! Process-local implementation of the session contract: linearizable
//! operations under a single lock, per-parent sequence counters,
//! ephemeral cleanup on session expiry, and one-shot watches. Backs the
//! integration tests and the local cluster simulation; production
//! deployments supply their own [`CoordinationSession`] implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    parent_path, CoordinationSession, CreateMode, NodeStat, Watch, WatchEvent, WatchKind,
    ANY_VERSION,
};
use crate::error::{FlockError, Result};

struct NodeRecord {
    payload: Vec<u8>,
    version: i32,
    /// Owning session id for ephemerals, 0 for persistent nodes
    owner: u64,
}

struct PathWatch {
    path: String,
    session: u64,
    sender: oneshot::Sender<WatchEvent>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, NodeRecord>,
    /// Per-parent counters backing sequential creation
    counters: HashMap<String, u64>,
    next_session_id: u64,
    exists_watches: Vec<PathWatch>,
    child_watches: Vec<PathWatch>,
}

impl StoreState {
    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{}/", parent)
        };
        self.nodes
            .keys()
            .filter(|p| p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
            .map(|p| p[prefix.len()..].to_string())
            .collect()
    }

    fn stat_of(&self, path: &str) -> Option<NodeStat> {
        self.nodes.get(path).map(|record| NodeStat {
            version: record.version,
            ephemeral_owner: record.owner,
            num_children: self.child_names(path).len() as u32,
        })
    }

    fn fire_exists(&mut self, path: &str, kind: WatchKind) {
        let fired = std::mem::take(&mut self.exists_watches);
        for watch in fired {
            if watch.path == path {
                let _ = watch.sender.send(WatchEvent {
                    path: path.to_string(),
                    kind,
                });
            } else {
                self.exists_watches.push(watch);
            }
        }
    }

    fn fire_children(&mut self, parent: &str) {
        let fired = std::mem::take(&mut self.child_watches);
        for watch in fired {
            if watch.path == parent {
                let _ = watch.sender.send(WatchEvent {
                    path: parent.to_string(),
                    kind: WatchKind::ChildrenChanged,
                });
            } else {
                self.child_watches.push(watch);
            }
        }
    }
}

/// Shared in-memory store; hand out one [`MemorySession`] per process
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new live session
    pub fn session(&self) -> Arc<MemorySession> {
        let mut state = self.state.lock();
        state.next_session_id += 1;
        let id = state.next_session_id;
        debug!("opened store session {}", id);
        Arc::new(MemorySession {
            id,
            state: self.state.clone(),
            connected: AtomicBool::new(true),
        })
    }
}

/// One session lease on a [`MemoryStore`]
pub struct MemorySession {
    id: u64,
    state: Arc<Mutex<StoreState>>,
    connected: AtomicBool,
}

impl MemorySession {
    /// Terminate the session: ephemerals vanish, pending watches it
    /// registered are cancelled. Simulates a crash or liveness timeout.
    pub fn expire(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();

        // A dead session's own watches never fire.
        state.exists_watches.retain(|w| w.session != self.id);
        state.child_watches.retain(|w| w.session != self.id);

        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, record)| record.owner == self.id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            state.nodes.remove(&path);
            state.fire_exists(&path, WatchKind::NodeDeleted);
            state.fire_children(parent_path(&path));
            debug!("session {} expiry removed {}", self.id, path);
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FlockError::CoordinationUnavailable {
                reason: format!("session {} expired", self.id),
            })
        }
    }

    fn validate_path(path: &str) -> Result<()> {
        if !path.starts_with('/') || path == "/" || path.ends_with('/') {
            return Err(FlockError::Internal {
                message: format!("malformed node path: {}", path),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode) -> Result<String> {
        self.ensure_connected()?;
        if mode.is_sequential() {
            // Sequential paths end in the name prefix, not a full leaf.
            if !path.starts_with('/') || path.ends_with('/') {
                return Err(FlockError::Internal {
                    message: format!("malformed node path: {}", path),
                });
            }
        } else {
            Self::validate_path(path)?;
        }

        let mut state = self.state.lock();
        let parent = parent_path(path).to_string();
        if parent != "/" && !state.nodes.contains_key(&parent) {
            return Err(FlockError::NodeNotFound { path: parent });
        }

        let actual = if mode.is_sequential() {
            let counter = state.counters.entry(parent.clone()).or_insert(0);
            let assigned = *counter;
            *counter += 1;
            format!("{}{:010}", path, assigned)
        } else {
            path.to_string()
        };
        if state.nodes.contains_key(&actual) {
            return Err(FlockError::NodeExists { path: actual });
        }

        let owner = if mode.is_ephemeral() { self.id } else { 0 };
        state.nodes.insert(
            actual.clone(),
            NodeRecord {
                payload: payload.to_vec(),
                version: 0,
                owner,
            },
        );
        state.fire_exists(&actual, WatchKind::NodeCreated);
        state.fire_children(&parent);
        Ok(actual)
    }

    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        self.ensure_connected()?;
        Ok(self.state.lock().stat_of(path))
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<NodeStat>, Watch)> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        let stat = state.stat_of(path);
        let (sender, receiver) = oneshot::channel();
        state.exists_watches.push(PathWatch {
            path: path.to_string(),
            session: self.id,
            sender,
        });
        Ok((stat, receiver))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let state = self.state.lock();
        if path != "/" && !state.nodes.contains_key(path) {
            return Err(FlockError::NodeNotFound {
                path: path.to_string(),
            });
        }
        Ok(state.child_names(path))
    }

    async fn get_children_watch(&self, path: &str) -> Result<(Vec<String>, Watch)> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        if path != "/" && !state.nodes.contains_key(path) {
            return Err(FlockError::NodeNotFound {
                path: path.to_string(),
            });
        }
        let children = state.child_names(path);
        let (sender, receiver) = oneshot::channel();
        state.child_watches.push(PathWatch {
            path: path.to_string(),
            session: self.id,
            sender,
        });
        Ok((children, receiver))
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        let state = self.state.lock();
        state
            .nodes
            .get(path)
            .map(|record| record.payload.clone())
            .ok_or_else(|| FlockError::NodeNotFound {
                path: path.to_string(),
            })
    }

    async fn delete(&self, path: &str, expected_version: i32) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        let record = state.nodes.get(path).ok_or_else(|| FlockError::NodeNotFound {
            path: path.to_string(),
        })?;
        if expected_version != ANY_VERSION && expected_version != record.version {
            return Err(FlockError::VersionMismatch {
                path: path.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }
        if !state.child_names(path).is_empty() {
            return Err(FlockError::Internal {
                message: format!("cannot delete {}: node has children", path),
            });
        }
        state.nodes.remove(path);
        state.fire_exists(path, WatchKind::NodeDeleted);
        state.fire_children(parent_path(path));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> u64 {
        self.id
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}
