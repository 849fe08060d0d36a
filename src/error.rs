//! Error types for flock
//!
//! Error taxonomy covering coordination-store access, election and
//! membership protocol violations, and the task-serving boundary.

use thiserror::Error;

/// Primary error type for all flock operations
#[derive(Debug, Error)]
pub enum FlockError {
    // ========== Coordination Store Errors ==========

    /// Session to the coordination store is not connected
    #[error("coordination store unavailable: {reason}")]
    CoordinationUnavailable { reason: String },

    /// Node expected to exist is absent
    #[error("node not found: {path}")]
    NodeNotFound { path: String },

    /// Node already exists at the target path
    #[error("node already exists: {path}")]
    NodeExists { path: String },

    /// Conditional delete failed on version
    #[error("version mismatch on {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        path: String,
        expected: i32,
        actual: i32,
    },

    // ========== Election Errors ==========

    /// Election was run before a candidacy was created
    #[error("election run without volunteering first")]
    NotVolunteered,

    /// A live candidacy already exists for this session
    #[error("already volunteered as {path}")]
    AlreadyVolunteered { path: String },

    /// The candidacy no longer exists in the election namespace
    #[error("stale candidacy: {path} is gone, re-volunteer before running the election")]
    StaleCandidacy { path: String },

    // ========== Membership Errors ==========

    /// Registry namespace has not been created yet
    #[error("membership namespace {path} missing, call ensure_namespace first")]
    NamespaceMissing { path: String },

    /// A live self-registration already exists
    #[error("already registered as {path}")]
    AlreadyRegistered { path: String },

    // ========== Task Boundary Errors ==========

    /// Local task endpoint was started twice
    #[error("task endpoint already running at {address}")]
    EndpointAlreadyRunning { address: String },

    /// Task request body failed to parse
    #[error("invalid task payload: {reason}")]
    InvalidTaskPayload { reason: String },

    /// Outbound task dispatch to a worker failed
    #[error("dispatch to {address} failed: {reason}")]
    DispatchFailed { address: String, reason: String },

    // ========== Runtime Errors ==========

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FlockError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlockError::CoordinationUnavailable { .. } | FlockError::DispatchFailed { .. }
        )
    }

    /// Returns true if this error is a programming mistake by the caller
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            FlockError::NotVolunteered
                | FlockError::AlreadyVolunteered { .. }
                | FlockError::NamespaceMissing { .. }
                | FlockError::AlreadyRegistered { .. }
                | FlockError::EndpointAlreadyRunning { .. }
        )
    }
}

/// Result type alias for flock operations
pub type Result<T> = std::result::Result<T, FlockError>;
