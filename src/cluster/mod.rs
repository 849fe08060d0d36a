//! Cluster coordination layer
//!
//! Leader election, live-membership registry, and the role transitions
//! that react to election outcomes.

pub mod election;
pub mod registry;
pub mod role;

pub use election::{
    ElectionCallback, ElectionCandidate, ElectionOutcome, ElectionState, LeaderElection, Role,
};
pub use registry::{MembershipRegistry, MembershipSnapshot};
pub use role::RoleCoordinator;
