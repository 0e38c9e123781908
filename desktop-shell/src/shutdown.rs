// desktop-shell/src/shutdown.rs
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// What asked the shell to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    WindowClosed,
    EngineExited,
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "interrupt signal"),
            ShutdownReason::WindowClosed => write!(f, "window closed"),
            ShutdownReason::EngineExited => write!(f, "engine exited"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

/// Cloneable trigger shared by the signal listener, the window and the
/// session. Only the first trigger wins; the rest are no-ops.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    reason: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { reason: Arc::new(tx) }
    }

    /// Returns true only for the call that actually started shutdown
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });

        if first {
            tracing::info!("Shutdown requested: {}", reason);
        } else {
            tracing::debug!("Shutdown already in progress, ignoring {}", reason);
        }
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once any trigger has fired
    pub async fn triggered(&self) -> ShutdownReason {
        let mut rx = self.reason.subscribe();
        let reason = match rx.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(ShutdownReason::Requested)
    }
}
