//! Graceful shutdown as an observable state machine: Running → Draining → Stopped.
//!
//! Draining stops intake and lets in-flight work finish. When the grace period
//! runs out the abort token cancels whatever is still in flight; those
//! messages stay uncommitted and are redelivered after restart.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Running => write!(f, "running"),
            PipelineState::Draining => write!(f, "draining"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownController {
    state: Arc<watch::Sender<PipelineState>>,
    drain: CancellationToken,
    abort: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PipelineState::Running);
        Self {
            state: Arc::new(state),
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Running → Draining. Returns false if shutdown had already begun.
    pub fn begin_drain(&self) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Draining;
                true
            } else {
                false
            }
        });
        if started {
            tracing::info!("Pipeline draining");
            self.drain.cancel();
        }
        started
    }

    /// Cancel in-flight work. Implies draining.
    pub fn abort(&self) {
        self.begin_drain();
        if !self.abort.is_cancelled() {
            tracing::warn!("Aborting in-flight processing");
            self.abort.cancel();
        }
    }

    /// Final transition, from any state.
    pub fn mark_stopped(&self) {
        self.drain.cancel();
        let changed = self.state.send_if_modified(|state| {
            if *state == PipelineState::Stopped {
                false
            } else {
                *state = PipelineState::Stopped;
                true
            }
        });
        if changed {
            tracing::info!("Pipeline stopped");
        }
    }

    /// Cancelled once draining starts.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Cancelled when the grace period expires.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub async fn wait_until_stopped(&self) {
        let mut rx = self.subscribe();
        // Sender lives in self, so this only errors if the controller is gone
        let _ = rx.wait_for(|state| *state == PipelineState::Stopped).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
