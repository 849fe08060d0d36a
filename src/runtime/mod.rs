//! Process runtime utilities
//!
//! Shutdown signaling for coordinated cleanup.

pub mod shutdown;

pub use shutdown::ShutdownSignal;
