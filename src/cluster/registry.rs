//! Live-membership registry
//!
//! Session-scoped self-registration plus a cached snapshot of all live
//! member addresses. The snapshot is immutable and replaced by a single
//! pointer swap, so concurrent readers always see a fully-consistent
//! prior or current view.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{FlockError, Result};
use crate::store::{
    leaf_name, sequence_id, CoordinationSession, CreateMode, Watch, ANY_VERSION,
};

/// Fixed membership namespace
pub const REGISTRY_NAMESPACE: &str = "/service-registry";

/// Membership entry name prefix
const NODE_PREFIX: &str = "node-";

/// Delay before retrying a failed steady-state refresh
const REFRESH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Immutable, versioned view of all registered worker addresses
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    version: u64,
    members: BTreeMap<u64, String>,
}

impl MembershipSnapshot {
    /// Monotonic snapshot version, bumped on every refresh
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Members keyed by registration sequence id
    pub fn members(&self) -> &BTreeMap<u64, String> {
        &self.members
    }

    /// Member addresses in ascending sequence order
    pub fn addresses(&self) -> Vec<String> {
        self.members.values().cloned().collect()
    }

    /// Number of live members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no members are registered
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Registry of live workers, backed by ephemeral registration nodes
pub struct MembershipRegistry {
    session: Arc<dyn CoordinationSession>,
    /// Path of this process's own registration, if any
    self_node: Mutex<Option<String>>,
    snapshot: RwLock<Option<Arc<MembershipSnapshot>>>,
    namespace_ready: AtomicBool,
}

impl MembershipRegistry {
    /// Create a registry bound to one coordination session
    pub fn new(session: Arc<dyn CoordinationSession>) -> Self {
        Self {
            session,
            self_node: Mutex::new(None),
            snapshot: RwLock::new(None),
            namespace_ready: AtomicBool::new(false),
        }
    }

    /// Idempotently create the persistent membership namespace
    ///
    /// The namespace outlives any single member and must exist before
    /// registration or refresh.
    pub async fn ensure_namespace(&self) -> Result<()> {
        if self.session.exists(REGISTRY_NAMESPACE).await?.is_none() {
            match self
                .session
                .create(REGISTRY_NAMESPACE, &[], CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(FlockError::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.namespace_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Register this process as a dispatch target
    ///
    /// Creates an ephemeral sequential node holding `address` and returns
    /// the assigned sequence id. At most one active self-registration; a
    /// registration lost with its session can be replaced.
    pub async fn register_self(&self, address: &str) -> Result<u64> {
        if !self.namespace_ready.load(Ordering::SeqCst) {
            return Err(FlockError::NamespaceMissing {
                path: REGISTRY_NAMESPACE.into(),
            });
        }
        let existing = self.self_node.lock().clone();
        if let Some(path) = existing {
            if self.session.exists(&path).await?.is_some() {
                return Err(FlockError::AlreadyRegistered { path });
            }
            // The node died with a previous session; replace it.
        }

        let prefix = format!("{}/{}", REGISTRY_NAMESPACE, NODE_PREFIX);
        let node_path = self
            .session
            .create(&prefix, address.as_bytes(), CreateMode::EphemeralSequential)
            .await?;
        let sequence = sequence_id(leaf_name(&node_path)).ok_or_else(|| FlockError::Internal {
            message: format!("store returned non-sequential member path {}", node_path),
        })?;
        info!("registered {} as {}", address, node_path);
        *self.self_node.lock() = Some(node_path);
        Ok(sequence)
    }

    /// Remove this process's registration
    ///
    /// Safe to call redundantly: absence of a registration, or one
    /// already reclaimed by session loss, is not an error.
    pub async fn unregister_self(&self) -> Result<()> {
        let Some(path) = self.self_node.lock().take() else {
            debug!("unregister with no active registration");
            return Ok(());
        };
        if !self.session.is_connected() {
            // Session loss already reclaimed the ephemeral node.
            return Ok(());
        }
        match self.session.delete(&path, ANY_VERSION).await {
            Ok(()) => {
                info!("unregistered {}", path);
                Ok(())
            }
            Err(FlockError::NodeNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether this process currently holds a live registration node
    pub async fn is_registered(&self) -> Result<bool> {
        let path = self.self_node.lock().clone();
        match path {
            Some(path) => Ok(self.session.exists(&path).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Rebuild the snapshot and re-arm the children-watch
    ///
    /// Lists all registration nodes, fetches each address, and publishes
    /// a new snapshot atomically. Entries that vanish between listing and
    /// fetch are skipped for this refresh. Returns the armed one-shot
    /// watch; watches are one-shot, so continuous coverage requires a
    /// fresh call after every fire.
    pub async fn refresh(&self) -> Result<Watch> {
        if !self.namespace_ready.load(Ordering::SeqCst) {
            return Err(FlockError::NamespaceMissing {
                path: REGISTRY_NAMESPACE.into(),
            });
        }
        let (children, watch) = self.session.get_children_watch(REGISTRY_NAMESPACE).await?;

        let mut members = BTreeMap::new();
        for child in children {
            let Some(sequence) = sequence_id(&child) else {
                warn!("ignoring foreign node {} in membership namespace", child);
                continue;
            };
            let path = format!("{}/{}", REGISTRY_NAMESPACE, child);
            match self.session.get_data(&path).await {
                Ok(payload) => match String::from_utf8(payload) {
                    Ok(address) => {
                        members.insert(sequence, address);
                    }
                    Err(_) => warn!("member {} holds a non-utf8 address, skipping", child),
                },
                Err(FlockError::NodeNotFound { .. }) => {
                    debug!("member {} vanished during refresh", child);
                }
                Err(e) => return Err(e),
            }
        }

        let version = self
            .snapshot
            .read()
            .as_ref()
            .map(|snapshot| snapshot.version)
            .unwrap_or(0)
            + 1;
        let snapshot = Arc::new(MembershipSnapshot { version, members });
        info!(
            "membership snapshot v{}: {:?}",
            snapshot.version,
            snapshot.addresses()
        );
        *self.snapshot.write() = Some(snapshot);
        Ok(watch)
    }

    /// Most recent membership snapshot
    ///
    /// Takes an initial snapshot if none has ever been published. Safe
    /// for concurrent readers.
    pub async fn current_snapshot(&self) -> Result<Arc<MembershipSnapshot>> {
        if let Some(snapshot) = self.snapshot.read().clone() {
            return Ok(snapshot);
        }
        let _initial_watch = self.refresh().await?;
        self.snapshot
            .read()
            .clone()
            .ok_or_else(|| FlockError::Internal {
                message: "refresh published no snapshot".into(),
            })
    }

    /// Leader-side watch loop: refresh, await the fire, repeat
    ///
    /// Re-arms the children-watch on every fire for continuous coverage.
    /// Steady-state refresh failures are logged and retried; a lost
    /// session or caller error ends the loop.
    pub async fn watch_membership(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            let watch = match self.refresh().await {
                Ok(watch) => watch,
                Err(e) => {
                    if !self.session.is_connected() || e.is_caller_error() {
                        return Err(e);
                    }
                    warn!("membership refresh failed: {}, retrying", e);
                    tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                    continue;
                }
            };
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("membership watch stopped by shutdown");
                    return Ok(());
                }
                fired = watch => match fired {
                    Ok(event) => debug!("membership watch fired: {:?}", event),
                    Err(_) => {
                        return Err(FlockError::CoordinationUnavailable {
                            reason: "session ended while watching membership".into(),
                        });
                    }
                }
            }
        }
    }
}
