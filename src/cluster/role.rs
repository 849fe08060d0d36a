//! Role transitions
//!
//! Reacts to election outcomes: a leader leaves the dispatch pool and
//! watches membership; a worker serves tasks and registers itself as a
//! dispatch target. The leader-never-serves policy means an elected
//! leader is absent from the registry and receives no dispatched work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info};

use super::election::{ElectionCallback, Role};
use super::registry::MembershipRegistry;
use crate::error::{FlockError, Result};
use crate::http::TaskServer;
use crate::runtime::ShutdownSignal;

/// Drives the registry and task endpoint according to election outcomes
pub struct RoleCoordinator {
    registry: Arc<MembershipRegistry>,
    server: Arc<TaskServer>,
    advertised_host: String,
    shutdown: ShutdownSignal,
    watching: AtomicBool,
    role: RwLock<Option<Role>>,
}

impl RoleCoordinator {
    /// Wire the coordinator to its registry, endpoint, and shutdown signal
    pub fn new(
        registry: Arc<MembershipRegistry>,
        server: Arc<TaskServer>,
        advertised_host: String,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            server,
            advertised_host,
            shutdown,
            watching: AtomicBool::new(false),
            role: RwLock::new(None),
        }
    }

    /// Role from the last completed election round, `None` before the first
    pub fn role(&self) -> Option<Role> {
        *self.role.read()
    }
}

#[async_trait]
impl ElectionCallback for RoleCoordinator {
    /// Leave the dispatch pool, then start watching membership
    ///
    /// Idempotent across reconnects: the redundant unregister is a no-op
    /// and the membership watch loop is spawned at most once.
    async fn on_elected_leader(&self) -> Result<()> {
        self.registry.unregister_self().await?;
        if !self.watching.swap(true, Ordering::SeqCst) {
            let registry = self.registry.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = registry.watch_membership(shutdown).await {
                    error!("membership watch ended: {}", e);
                }
            });
        }
        *self.role.write() = Some(Role::Leader);
        info!("assumed leader role");
        Ok(())
    }

    /// Serve tasks and join the dispatch pool
    async fn on_worker(&self) -> Result<()> {
        if !self.server.is_running() {
            self.server.start().await?;
        }
        let local_addr = self.server.local_addr().ok_or_else(|| FlockError::Internal {
            message: "task server running without a bound address".into(),
        })?;
        let address = format!("http://{}:{}", self.advertised_host, local_addr.port());

        // Re-elections re-enter this callback; the registration survives.
        if !self.registry.is_registered().await? {
            self.registry.register_self(&address).await?;
        }
        *self.role.write() = Some(Role::Worker);
        info!("assumed worker role at {}", address);
        Ok(())
    }
}
