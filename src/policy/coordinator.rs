//! Reload handshake.
//!
//! Every reload trigger (the HTTP lifecycle endpoint, SIGHUP) submits a
//! request carrying a reply channel into a single-slot queue. One loop drains
//! the queue, so at most one reload runs at a time and each trigger gets the
//! outcome of its own reload back.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PolicyError, ReloadError};
use crate::health::HealthState;
use crate::lifecycle::LifecycleEvent;
use crate::policy::store::PolicyStore;

/// Something the coordinator can reload.
///
/// `PolicyStore` is the production source.
#[async_trait]
pub trait PolicySource: Send + Sync + 'static {
    async fn reload(&self) -> Result<(), PolicyError>;
}

#[async_trait]
impl PolicySource for PolicyStore {
    async fn reload(&self) -> Result<(), PolicyError> {
        PolicyStore::reload(self).await
    }
}

/// A pending reload and the channel its outcome is sent back on
#[derive(Debug)]
pub struct ReloadRequest {
    reply: oneshot::Sender<Result<(), PolicyError>>,
}

/// Cloneable submitter for reload requests
#[derive(Clone, Debug)]
pub struct ReloadHandle {
    tx: mpsc::Sender<ReloadRequest>,
}

impl ReloadHandle {
    /// Submit a reload and wait for its outcome.
    ///
    /// Only the caller waits; other requests keep being served.
    pub async fn reload(&self) -> Result<(), ReloadError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(ReloadRequest { reply })
            .await
            .map_err(|_| ReloadError::CoordinatorGone)?;
        outcome.await.map_err(|_| ReloadError::CoordinatorGone)??;
        Ok(())
    }
}

/// Create the single-slot reload queue
pub fn reload_channel() -> (ReloadHandle, mpsc::Receiver<ReloadRequest>) {
    let (tx, rx) = mpsc::channel(1);
    (ReloadHandle { tx }, rx)
}

/// Drain reload requests until cancelled.
///
/// When `health_state` is provided the lifecycle moves through `Reloading`
/// for the duration of each reload.
pub async fn run_reload_loop<S: PolicySource>(
    source: Arc<S>,
    mut requests: mpsc::Receiver<ReloadRequest>,
    health_state: Option<Arc<HealthState>>,
    cancel: CancellationToken,
) {
    info!(component = "configuration", "Reload coordinator started");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        if let Some(ref state) = health_state {
            state.lifecycle.apply(LifecycleEvent::ReloadStarted).await;
        }

        let outcome = source.reload().await;

        if let Some(ref state) = health_state {
            state.lifecycle.apply(LifecycleEvent::ReloadFinished).await;
        }

        if request.reply.send(outcome).is_err() {
            debug!(component = "configuration", "Reload requester went away before the reply");
        }
    }

    info!(component = "configuration", "Reload coordinator stopped");
}
