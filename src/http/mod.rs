//! HTTP task boundary
//!
//! Worker-side task endpoint and leader-side dispatch client.

pub mod dispatch;
pub mod server;

pub use dispatch::TaskDispatcher;
pub use server::TaskServer;
