//! Leader election
//!
//! Volunteering and the predecessor-watch re-election state machine.
//! Each candidate watches only the sibling immediately ahead of it, so a
//! failure wakes exactly one process per step instead of the whole fleet.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{FlockError, Result};
use crate::store::{leaf_name, sequence_id, CoordinationSession, CreateMode, Watch};

/// Fixed election namespace
pub const ELECTION_NAMESPACE: &str = "/election";

/// Candidacy node name prefix
const CANDIDATE_PREFIX: &str = "candidate-";

/// Listing retries before a missing own candidacy is treated as stale
const MAX_LISTING_RETRIES: usize = 5;

/// Role decided by an election round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the smallest live sequence id
    Leader,
    /// Any other live candidate
    Worker,
}

/// Election state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No candidacy exists
    Unstarted,
    /// Candidacy created, no round completed yet
    Volunteered,
    /// Won an election round
    Leader,
    /// Lost the round, watching the immediate predecessor
    WatchingPredecessor,
}

/// One process's bid for leadership
#[derive(Debug, Clone)]
pub struct ElectionCandidate {
    /// Store-assigned sequence suffix, totally ordered across candidates
    pub sequence_id: u64,
    /// Full path of the candidacy node
    pub node_path: String,
}

/// Outcome of a single election round
#[derive(Debug)]
pub enum ElectionOutcome {
    /// This process is the leader; no watch is armed
    Leader,
    /// This process is a worker; the predecessor watch is armed
    Watching(Watch),
}

/// Callbacks invoked once per completed election round
#[async_trait]
pub trait ElectionCallback: Send + Sync {
    /// This process won the round
    async fn on_elected_leader(&self) -> Result<()>;

    /// This process lost the round and is now a worker
    async fn on_worker(&self) -> Result<()>;
}

/// Election participant bound to one coordination session
pub struct LeaderElection {
    session: Arc<dyn CoordinationSession>,
    candidate: Option<ElectionCandidate>,
    state: ElectionState,
    role: Option<Role>,
}

impl LeaderElection {
    /// Create an election participant; call [`volunteer`](Self::volunteer) next
    pub fn new(session: Arc<dyn CoordinationSession>) -> Self {
        Self {
            session,
            candidate: None,
            state: ElectionState::Unstarted,
            role: None,
        }
    }

    /// Idempotently create the persistent election namespace
    pub async fn ensure_namespace(session: &dyn CoordinationSession) -> Result<()> {
        if session.exists(ELECTION_NAMESPACE).await?.is_none() {
            match session
                .create(ELECTION_NAMESPACE, &[], CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(FlockError::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Current state machine position
    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Role decided by the last completed round, `None` before the first
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The live candidacy, if any
    pub fn candidate(&self) -> Option<&ElectionCandidate> {
        self.candidate.as_ref()
    }

    /// Create this session's candidacy node
    ///
    /// At most one live candidacy per session generation; after session
    /// loss a fresh call creates a new candidacy with a new sequence id.
    pub async fn volunteer(&mut self) -> Result<&ElectionCandidate> {
        if !self.session.is_connected() {
            return Err(FlockError::CoordinationUnavailable {
                reason: "cannot volunteer without a live session".into(),
            });
        }
        if let Some(existing) = &self.candidate {
            if self.session.exists(&existing.node_path).await?.is_some() {
                return Err(FlockError::AlreadyVolunteered {
                    path: existing.node_path.clone(),
                });
            }
        }

        let prefix = format!("{}/{}", ELECTION_NAMESPACE, CANDIDATE_PREFIX);
        let node_path = self
            .session
            .create(&prefix, &[], CreateMode::EphemeralSequential)
            .await?;
        let sequence = sequence_id(leaf_name(&node_path)).ok_or_else(|| FlockError::Internal {
            message: format!("store returned non-sequential candidacy path {}", node_path),
        })?;
        info!("volunteered as {} (sequence {})", node_path, sequence);

        self.state = ElectionState::Volunteered;
        self.role = None;
        Ok(self.candidate.insert(ElectionCandidate {
            sequence_id: sequence,
            node_path,
        }))
    }

    /// Run one election round
    ///
    /// Lists all candidacies, sorts by sequence id, and either assumes
    /// leadership (smallest id) or arms a one-shot watch on the immediate
    /// predecessor. The matching callback runs before this returns. Loops
    /// internally while expected races unwind: a predecessor deleted
    /// between listing and watch registration, or an own candidacy not
    /// yet visible in the listing.
    pub async fn run_election(
        &mut self,
        callbacks: &dyn ElectionCallback,
    ) -> Result<ElectionOutcome> {
        let candidate = self.candidate.clone().ok_or(FlockError::NotVolunteered)?;
        if !self.session.is_connected() {
            // Session loss voided the ephemeral candidacy.
            self.state = ElectionState::Unstarted;
            self.role = None;
            return Err(FlockError::StaleCandidacy {
                path: candidate.node_path,
            });
        }

        let my_name = leaf_name(&candidate.node_path).to_string();
        let mut missing_listings = 0;
        loop {
            let mut children = self.session.get_children(ELECTION_NAMESPACE).await?;
            children.sort();

            let Some(position) = children.iter().position(|name| *name == my_name) else {
                // Listing can race our own create; a withdrawn or expired
                // candidacy never reappears.
                missing_listings += 1;
                if missing_listings > MAX_LISTING_RETRIES {
                    self.state = ElectionState::Unstarted;
                    self.role = None;
                    return Err(FlockError::StaleCandidacy {
                        path: candidate.node_path,
                    });
                }
                debug!("candidacy {} not in listing yet, requerying", my_name);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            };

            if position == 0 {
                info!("elected leader as {}", my_name);
                self.state = ElectionState::Leader;
                self.role = Some(Role::Leader);
                callbacks.on_elected_leader().await?;
                return Ok(ElectionOutcome::Leader);
            }

            let predecessor = &children[position - 1];
            let predecessor_path = format!("{}/{}", ELECTION_NAMESPACE, predecessor);
            let (stat, watch) = self.session.exists_watch(&predecessor_path).await?;
            if stat.is_none() {
                debug!(
                    "predecessor {} vanished before the watch armed, re-deriving",
                    predecessor
                );
                continue;
            }

            info!("not the leader, watching predecessor {}", predecessor);
            self.state = ElectionState::WatchingPredecessor;
            self.role = Some(Role::Worker);
            callbacks.on_worker().await?;
            return Ok(ElectionOutcome::Watching(watch));
        }
    }

    /// Drive the election until leadership or shutdown
    ///
    /// Re-runs the election from scratch on every predecessor-watch fire,
    /// re-deriving the current predecessor each time since several
    /// candidates may have failed between arming and firing. Returns once
    /// this process is the leader (a leader only needs to learn about its
    /// own node's destruction, which is session-scoped) or the shutdown
    /// signal fires.
    pub async fn run(
        &mut self,
        callbacks: &dyn ElectionCallback,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            let watch = match self.run_election(callbacks).await? {
                ElectionOutcome::Leader => return Ok(()),
                ElectionOutcome::Watching(watch) => watch,
            };
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("election loop stopped by shutdown");
                    return Ok(());
                }
                fired = watch => match fired {
                    Ok(event) => debug!("predecessor watch fired: {:?}", event),
                    Err(_) => {
                        self.state = ElectionState::Unstarted;
                        self.role = None;
                        return Err(FlockError::CoordinationUnavailable {
                            reason: "session ended while watching predecessor".into(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    struct Recording {
        outcomes: Mutex<Vec<Role>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ElectionCallback for Recording {
        async fn on_elected_leader(&self) -> Result<()> {
            self.outcomes.lock().push(Role::Leader);
            Ok(())
        }

        async fn on_worker(&self) -> Result<()> {
            self.outcomes.lock().push(Role::Worker);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_election_requires_volunteering() {
        let store = MemoryStore::new();
        let session = store.session();
        LeaderElection::ensure_namespace(session.as_ref())
            .await
            .unwrap();

        let callbacks = Recording::new();
        let mut election = LeaderElection::new(session);
        let err = election.run_election(callbacks.as_ref()).await.unwrap_err();
        assert!(matches!(err, FlockError::NotVolunteered));
        assert_eq!(election.role(), None);
    }

    #[tokio::test]
    async fn test_double_volunteer_is_caller_error() {
        let store = MemoryStore::new();
        let session = store.session();
        LeaderElection::ensure_namespace(session.as_ref())
            .await
            .unwrap();

        let mut election = LeaderElection::new(session);
        election.volunteer().await.unwrap();
        let err = election.volunteer().await.unwrap_err();
        assert!(matches!(err, FlockError::AlreadyVolunteered { .. }));
    }

    #[tokio::test]
    async fn test_sole_candidate_becomes_leader() {
        let store = MemoryStore::new();
        let session = store.session();
        LeaderElection::ensure_namespace(session.as_ref())
            .await
            .unwrap();

        let callbacks = Recording::new();
        let mut election = LeaderElection::new(session);
        election.volunteer().await.unwrap();
        assert_eq!(election.state(), ElectionState::Volunteered);

        let outcome = election.run_election(callbacks.as_ref()).await.unwrap();
        assert!(matches!(outcome, ElectionOutcome::Leader));
        assert_eq!(election.role(), Some(Role::Leader));
        assert_eq!(*callbacks.outcomes.lock(), vec![Role::Leader]);
    }

    #[tokio::test]
    async fn test_stale_candidacy_after_session_loss() {
        let store = MemoryStore::new();
        let bootstrap = store.session();
        LeaderElection::ensure_namespace(bootstrap.as_ref())
            .await
            .unwrap();

        let session = store.session();
        let mut election = LeaderElection::new(session.clone());
        election.volunteer().await.unwrap();

        session.expire();
        let callbacks = Recording::new();
        let err = election.run_election(callbacks.as_ref()).await.unwrap_err();
        assert!(matches!(err, FlockError::StaleCandidacy { .. }));
        assert_eq!(election.state(), ElectionState::Unstarted);
    }
}
