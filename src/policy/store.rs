//! Policy store holding the live snapshot.
//!
//! Readers take an `Arc` to the current snapshot without locking. A reload
//! reads and parses the policy file first, then swaps the pointer, so readers
//! see either the old snapshot or the new one in full.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::{PolicyError, Result, SubscriberError};
use crate::health::HealthState;
use crate::policy::rule::PolicySnapshot;

/// Callback invoked with every successfully installed snapshot.
///
/// Returning an error does not roll back the install.
pub type Subscriber =
    Box<dyn Fn(Arc<PolicySnapshot>) -> std::result::Result<(), SubscriberError> + Send + Sync>;

/// Owner of the current policy snapshot and its subscribers
pub struct PolicyStore {
    path: PathBuf,
    current: ArcSwap<PolicySnapshot>,
    /// Registered for the lifetime of the process, notified in order
    subscribers: RwLock<Vec<Subscriber>>,
    /// Serializes reloads against each other, not against readers
    reload_lock: Mutex<()>,
    /// Optional health state for reload metrics
    health_state: Option<Arc<HealthState>>,
}

impl PolicyStore {
    /// Create a store reading from `path`. It starts with an empty,
    /// never-installed snapshot until the first reload succeeds.
    pub fn new(path: impl Into<PathBuf>, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(PolicySnapshot::default()),
            subscribers: RwLock::new(Vec::new()),
            reload_lock: Mutex::new(()),
            health_state,
        }
    }

    /// Path of the policy file re-read on every reload
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The live snapshot. Safe to call concurrently with a reload.
    pub fn current_snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Register a callback for every successful reload
    pub async fn subscribe<F>(&self, callback: F)
    where
        F: Fn(Arc<PolicySnapshot>) -> std::result::Result<(), SubscriberError>
            + Send
            + Sync
            + 'static,
    {
        self.subscribers.write().await.push(Box::new(callback));
    }

    /// Reload the policy file and install it.
    ///
    /// On a load failure the current snapshot is left untouched. On success
    /// the new snapshot is installed before subscribers run; every subscriber
    /// is notified and the first subscriber error, if any, is returned.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        info!(component = "configuration", file = %self.path.display(), "Loading policy file");

        let snapshot = match PolicySnapshot::load(&self.path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    component = "configuration",
                    file = %self.path.display(),
                    error = %e,
                    "Failed to load policy file"
                );
                if let Some(ref state) = self.health_state {
                    state.metrics.record_reload(false, None);
                }
                return Err(e);
            }
        };

        let generation = self.current.load().generation() + 1;
        let snapshot = Arc::new(snapshot.with_generation(generation));
        self.current.store(Arc::clone(&snapshot));

        if let Some(ref state) = self.health_state {
            state.metrics.record_reload(true, Some(snapshot.len()));
        }

        info!(
            component = "configuration",
            file = %self.path.display(),
            generation,
            rules = snapshot.len(),
            "Completed loading of policy file"
        );

        self.notify(snapshot).await
    }

    async fn notify(&self, snapshot: Arc<PolicySnapshot>) -> Result<()> {
        let subscribers = self.subscribers.read().await;
        let mut first_error = None;

        for (index, subscriber) in subscribers.iter().enumerate() {
            if let Err(e) = subscriber(Arc::clone(&snapshot)) {
                warn!(
                    component = "configuration",
                    subscriber = index,
                    error = %e,
                    "Policy subscriber failed"
                );
                first_error.get_or_insert(PolicyError::Subscriber(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
