use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use courier_config::RuntimeConfig;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{outstanding::OutstandingTracker, request::RequestTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Running,
    Draining,
}

/// Which signal ended [`Manager::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Drained,
    DeadlineExceeded,
}

/// Owns the state shared by every topic and subscription: the outstanding-delivery
/// tracker and the cancellation signal handed to backends.
pub struct Manager {
    config: Arc<RuntimeConfig>,
    request_tracker: Arc<dyn RequestTracker>,
    outstanding: Arc<OutstandingTracker>,
    shutdown: CancellationToken,
    draining: AtomicBool,
    publish_counter: AtomicU64,
}

impl Manager {
    pub fn new(config: Arc<RuntimeConfig>, request_tracker: Arc<dyn RequestTracker>) -> Arc<Self> {
        Arc::new(Self {
            config,
            request_tracker,
            outstanding: Arc::new(OutstandingTracker::new()),
            shutdown: CancellationToken::new(),
            draining: AtomicBool::new(false),
            publish_counter: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tracing_enabled(&self) -> bool {
        self.config.tracing_enabled
    }

    pub fn outstanding(&self) -> &Arc<OutstandingTracker> {
        &self.outstanding
    }

    pub(crate) fn request_tracker(&self) -> &Arc<dyn RequestTracker> {
        &self.request_tracker
    }

    /// Signal for backends to stop accepting new work. Cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn state(&self) -> ManagerState {
        if self.draining.load(Ordering::SeqCst) {
            ManagerState::Draining
        } else {
            ManagerState::Running
        }
    }

    pub fn published_count(&self) -> u64 {
        self.publish_counter.load(Ordering::Relaxed)
    }

    pub(crate) fn record_publish(&self) {
        self.publish_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Stops backends from accepting new messages and waits until every in-flight
    /// delivery has finished or `deadline` resolves, whichever happens first.
    ///
    /// Handlers still running when the deadline fires are not interrupted.
    pub async fn shutdown<F>(&self, deadline: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        if !self.draining.swap(true, Ordering::SeqCst) {
            info!(
                "Pubsub shutting down with {} outstanding deliveries",
                self.outstanding.active()
            );
        }

        self.shutdown.cancel();
        self.outstanding.arm_for_shutdown();

        tokio::select! {
            _ = self.outstanding.done() => {
                info!("All outstanding deliveries finished");
                ShutdownOutcome::Drained
            }
            _ = deadline => {
                warn!(
                    "Shutdown deadline reached with {} deliveries still running",
                    self.outstanding.active()
                );
                ShutdownOutcome::DeadlineExceeded
            }
        }
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownOutcome {
        self.shutdown(tokio::time::sleep(timeout)).await
    }
}
