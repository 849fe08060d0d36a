//! Graceful shutdown handling
//!
//! Broadcast-based shutdown signaling for coordinated cleanup. Process
//! lifetime is an explicit wait on this signal rather than ad-hoc
//! park/notify.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Shutdown signal shared across components
///
/// Clone freely; all clones observe the same trigger.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<broadcast::Sender<()>>,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger shutdown; all subscribers and waiters wake
    pub fn shutdown(&self) {
        self.fired.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    /// Whether shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// New receiver for select-style consumption
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Park until shutdown is triggered; returns immediately if it already was
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
