//! Coordination store client contract
//!
//! Capability surface the cluster layer consumes from the coordination
//! store: hierarchical nodes, ephemeral/sequential creation, and one-shot
//! watches. The store itself is external; this module only defines the
//! session trait plus an in-memory implementation for tests and local
//! simulation.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;

pub mod memory;

pub use memory::{MemorySession, MemoryStore};

/// Version argument for an unconditional delete
pub const ANY_VERSION: i32 = -1;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Outlives the creating session
    Persistent,
    /// Outlives the session, store-assigned numeric suffix
    PersistentSequential,
    /// Destroyed when the creating session ends
    Ephemeral,
    /// Session-scoped, store-assigned numeric suffix
    EphemeralSequential,
}

impl CreateMode {
    /// Whether nodes of this mode die with their session
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the store appends a sequence suffix to the name
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// What a fired watch observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Watched path came into existence
    NodeCreated,
    /// Watched node was deleted
    NodeDeleted,
    /// Watched node's payload changed
    DataChanged,
    /// Watched node's child set changed
    ChildrenChanged,
}

/// Single notification delivered by a one-shot watch
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Path the watch was registered on
    pub path: String,
    /// Kind of change observed
    pub kind: WatchKind,
}

/// Receiver half of a one-shot watch registration
///
/// Resolves once when the watch fires, or with a receive error if the
/// owning session ends before any event occurs. Continuous coverage
/// requires re-arming via a fresh store call after every fire.
pub type Watch = oneshot::Receiver<WatchEvent>;

/// Node metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStat {
    /// Payload version, bumped on data writes
    pub version: i32,
    /// Session id owning an ephemeral node, 0 for persistent nodes
    pub ephemeral_owner: u64,
    /// Number of direct children
    pub num_children: u32,
}

/// A live session with the coordination store
///
/// Ephemeral nodes created through a session vanish when the session
/// ends. All watch-arming variants return the one-shot [`Watch`]
/// alongside the query result so the caller can await the fire.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Create a node, returning the actual path (with any sequence suffix)
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode) -> Result<String>;

    /// Query node metadata
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>>;

    /// Query node metadata and arm a watch for the next create/delete/change
    async fn exists_watch(&self, path: &str) -> Result<(Option<NodeStat>, Watch)>;

    /// List direct child names of a node
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// List children and arm a watch for the next child-set change
    async fn get_children_watch(&self, path: &str) -> Result<(Vec<String>, Watch)>;

    /// Read a node's payload
    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a node; [`ANY_VERSION`] skips the version check
    async fn delete(&self, path: &str, expected_version: i32) -> Result<()>;

    /// Whether the session is currently live
    fn is_connected(&self) -> bool;

    /// Store-assigned session id
    fn session_id(&self) -> u64;
}

/// Extracts the numeric sequence suffix from a sequential node name
///
/// Returns `None` for names that do not end in a store-assigned counter.
pub fn sequence_id(name: &str) -> Option<u64> {
    let digits = name.rsplit('-').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parent path of a node, with `/` as the root
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Leaf name of a node path
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
