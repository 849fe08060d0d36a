//! Cluster node wiring
//!
//! Assembles one process's components around a shared coordination
//! session: election, membership registry, role coordinator, and the
//! local task endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::cluster::{LeaderElection, MembershipRegistry, Role, RoleCoordinator};
use crate::error::Result;
use crate::http::TaskServer;
use crate::runtime::ShutdownSignal;
use crate::store::CoordinationSession;

/// Configuration for one cluster node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable identifier used in logs
    pub node_id: String,
    /// Hostname workers advertise to the leader
    pub host: String,
    /// Task endpoint port; 0 picks a free port
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            host: "127.0.0.1".into(),
            port: crate::DEFAULT_HTTP_PORT,
        }
    }
}

/// One interchangeable process of the fleet
pub struct ClusterNode {
    config: NodeConfig,
    session: Arc<dyn CoordinationSession>,
    registry: Arc<MembershipRegistry>,
    server: Arc<TaskServer>,
    coordinator: Arc<RoleCoordinator>,
    shutdown: ShutdownSignal,
    election_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterNode {
    /// Wire a node around an open coordination session
    pub fn new(config: NodeConfig, session: Arc<dyn CoordinationSession>) -> Self {
        let shutdown = ShutdownSignal::new();
        let registry = Arc::new(MembershipRegistry::new(session.clone()));
        let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let server = Arc::new(TaskServer::new(bind_addr));
        let coordinator = Arc::new(RoleCoordinator::new(
            registry.clone(),
            server.clone(),
            config.host.clone(),
            shutdown.clone(),
        ));
        Self {
            config,
            session,
            registry,
            server,
            coordinator,
            shutdown,
            election_task: Mutex::new(None),
        }
    }

    /// Node identifier
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Membership registry: leader-side reads, worker-side registration
    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    /// Local task endpoint
    pub fn server(&self) -> &Arc<TaskServer> {
        &self.server
    }

    /// Role decided by the last completed election round
    pub fn role(&self) -> Option<Role> {
        self.coordinator.role()
    }

    /// Ensure namespaces, volunteer, and spawn the election driver
    ///
    /// Errors during the initial volunteer sequence surface here, since
    /// no coherent role can be assumed otherwise. The spawned driver
    /// re-runs the election on every predecessor loss until this node
    /// leads or shuts down.
    pub async fn start(&self) -> Result<()> {
        LeaderElection::ensure_namespace(self.session.as_ref()).await?;
        self.registry.ensure_namespace().await?;

        let mut election = LeaderElection::new(self.session.clone());
        election.volunteer().await?;

        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.subscribe();
        let node_id = self.config.node_id.clone();
        let handle = tokio::spawn(async move {
            match election.run(coordinator.as_ref(), shutdown).await {
                Ok(()) => info!("election driver for {} finished", node_id),
                Err(e) => error!("election driver for {} failed: {}", node_id, e),
            }
        });
        *self.election_task.lock() = Some(handle);
        Ok(())
    }

    /// Park until the shutdown signal fires
    pub async fn run(&self) {
        self.shutdown.wait().await;
    }

    /// Trigger shutdown and stop the task endpoint
    pub fn stop(&self) {
        info!("stopping node {}", self.config.node_id);
        self.shutdown.shutdown();
        self.server.shutdown();
        // The election driver exits on the shutdown signal.
        self.election_task.lock().take();
    }
}
