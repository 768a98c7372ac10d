//! mixed-workload-webhook library crate
//!
//! A mutating admission webhook that tags workloads listed in a hot-reloadable
//! policy file for mixed (co-located) scheduling.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod policy;
pub mod webhooks;

pub use config::{Options, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH};
pub use error::{MutateError, PolicyError, ReloadError, ServerError, SubscriberError};
pub use health::HealthState;
pub use policy::{PolicyRule, PolicySnapshot, PolicyStore, ReloadHandle};
pub use webhooks::WebhookState;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lifecycle::{LifecycleApiState, LifecycleEvent};

/// Shared state for every HTTP route
pub struct AppState {
    pub webhook: Arc<WebhookState>,
    pub health: Arc<HealthState>,
    pub reload: ReloadHandle,
    pub enable_lifecycle: bool,
}

/// Create the policy store and perform the first load.
///
/// Every installed snapshot is handed to `webhook`. The first load must
/// succeed before anything is served: on failure the lifecycle moves to
/// `Stopped` and the error is returned, otherwise it moves to `Ready`.
pub async fn load_initial_policy(
    config_file: &Path,
    webhook: Arc<WebhookState>,
    health: Arc<HealthState>,
) -> Result<Arc<PolicyStore>, PolicyError> {
    let store = Arc::new(PolicyStore::new(config_file, Some(health.clone())));
    store
        .subscribe(move |snapshot| {
            webhook.apply_policy(snapshot);
            Ok(())
        })
        .await;

    info!(file = %store.path().display(), "Loading initial policy");
    if let Err(e) = store.reload().await {
        error!(error = %e, "Initial policy load failed");
        health.lifecycle.apply(LifecycleEvent::StartupFailed).await;
        return Err(e);
    }
    health.lifecycle.apply(LifecycleEvent::PolicyLoaded).await;
    Ok(store)
}

/// Create the full router: admission, probes, metrics and lifecycle API
pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .merge(webhooks::create_webhook_router(state.webhook.clone()))
        .merge(health::create_router(state.health.clone()))
        .merge(lifecycle::create_router(Arc::new(LifecycleApiState::new(
            state.reload.clone(),
            state.enable_lifecycle,
        ))))
}

/// How the listener is exposed
#[derive(Clone, Debug)]
pub enum Transport {
    /// TLS with a PEM certificate/key pair
    Tls { cert_path: PathBuf, key_path: PathBuf },
    /// Plaintext, for non-production deployments
    Plaintext,
}

impl Transport {
    pub fn from_options(opts: &Options) -> Self {
        if opts.insecure {
            Transport::Plaintext
        } else {
            Transport::Tls {
                cert_path: opts.tls_cert_file.clone(),
                key_path: opts.tls_key_file.clone(),
            }
        }
    }
}

/// Serve `app` until `cancel` fires.
///
/// The bound address is sent on `listening` once the socket accepts
/// connections; the sender is dropped if binding fails. On cancellation the
/// listener stops accepting connections and in-flight requests get up to
/// `grace_period` to finish. Returns an error if the listener fails on its own.
pub async fn run_server(
    app: Router,
    addr: SocketAddr,
    transport: Transport,
    grace_period: Duration,
    cancel: CancellationToken,
    listening: oneshot::Sender<SocketAddr>,
) -> Result<(), ServerError> {
    let handle = Handle::new();
    let notify = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Some(bound) = handle.listening().await {
                info!(component = "web", address = %bound, "Listener bound");
                let _ = listening.send(bound);
            }
        })
    };
    let shutdown = {
        let handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            info!(
                component = "web",
                grace_period_secs = grace_period.as_secs(),
                "Stopping listener"
            );
            handle.graceful_shutdown(Some(grace_period));
        })
    };

    let result = match transport {
        Transport::Tls { cert_path, key_path } => {
            match RustlsConfig::from_pem_file(cert_path, key_path).await {
                Ok(config) => {
                    info!(
                        component = "web",
                        address = %addr,
                        "Start listening for connections (TLS)"
                    );
                    axum_server::bind_rustls(addr, config)
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                        .map_err(ServerError::from)
                }
                Err(e) => Err(ServerError::TlsConfig(e.to_string())),
            }
        }
        Transport::Plaintext => {
            info!(
                component = "web",
                address = %addr,
                "Start listening for connections (plaintext)"
            );
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(ServerError::from)
        }
    };

    shutdown.abort();
    notify.abort();
    result
}
