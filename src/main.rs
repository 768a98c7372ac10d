//! mixed-workload-webhook - Mutating admission webhook for mixed workloads.
//!
//! This is the main entry point that:
//! - Parses options and initializes structured logging
//! - Loads the policy file (startup aborts if this fails)
//! - Starts the HTTP server, the reload coordinator and the SIGHUP listener
//! - Drains and exits on SIGTERM or SIGINT

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mixed_workload_webhook::config::LogFormat;
use mixed_workload_webhook::lifecycle::LifecycleEvent;
use mixed_workload_webhook::policy::{ReloadHandle, reload_channel, run_reload_loop};
use mixed_workload_webhook::{
    AppState, HealthState, Options, Transport, WebhookState, build_router, load_initial_policy,
    run_server,
};

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Options::parse();

    if let Err(e) = init_tracing(&opts) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = opts.validate() {
        error!(error = %e, "Invalid options");
        return ExitCode::FAILURE;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting mixed-workload-webhook");

    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}

fn init_tracing(opts: &Options) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(opts.log_directive().parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match opts.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
}

async fn run(opts: Options) -> Result<(), ()> {
    let addr = opts.listen_addr().map_err(|e| error!(error = %e, "Invalid listen address"))?;

    let health_state = Arc::new(HealthState::new());
    let webhook_state = Arc::new(WebhookState::new(Some(health_state.clone())));

    // The first load must succeed before any traffic is accepted
    let store =
        load_initial_policy(&opts.config_file, webhook_state.clone(), health_state.clone())
            .await
            .map_err(|_| error!("Exiting"))?;

    let cancel = CancellationToken::new();
    let (reload_handle, reload_requests) = reload_channel();

    let app = build_router(&AppState {
        webhook: webhook_state,
        health: health_state.clone(),
        reload: reload_handle.clone(),
        enable_lifecycle: opts.enable_lifecycle,
    });

    let (server_tx, mut server_rx) = mpsc::channel(1);
    let (listening_tx, mut listening_rx) = oneshot::channel();
    let server_handle = {
        let cancel = cancel.clone();
        let transport = Transport::from_options(&opts);
        let grace_period = opts.shutdown_grace_period();
        tokio::spawn(async move {
            let result =
                run_server(app, addr, transport, grace_period, cancel, listening_tx).await;
            if let Err(ref e) = result {
                error!(error = %e, "Error starting HTTP server");
            }
            let _ = server_tx.send(result).await;
        })
    };

    let reload_loop = tokio::spawn(run_reload_loop(
        store,
        reload_requests,
        Some(health_state.clone()),
        cancel.clone(),
    ));
    let hangup_listener = tokio::spawn(reload_on_hangup(reload_handle, cancel.clone()));

    let mut bound = false;
    let outcome = loop {
        tokio::select! {
            listening = &mut listening_rx, if !bound => {
                bound = true;
                // A dropped sender means binding failed; the error follows on server_rx
                if listening.is_ok() {
                    health_state.lifecycle.apply(LifecycleEvent::ServingStarted).await;
                    info!("Webhook is ready");
                }
            }
            _ = shutdown_signal(), if !cancel.is_cancelled() => {
                info!("Received shutdown signal, exiting gracefully...");
                health_state.lifecycle.apply(LifecycleEvent::ShutdownRequested).await;
                cancel.cancel();
            }
            result = server_rx.recv() => {
                break match result {
                    Some(Err(_)) => Err(()),
                    Some(Ok(())) | None => Ok(()),
                };
            }
        }
    };

    // A listener failure also stops the background tasks
    cancel.cancel();
    health_state.lifecycle.apply(LifecycleEvent::ServerStopped).await;

    for (name, task) in [
        ("reload coordinator", reload_loop),
        ("SIGHUP listener", hangup_listener),
        ("HTTP server", server_handle),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }

    info!("Webhook stopped");
    outcome
}

/// Submit a reload on every SIGHUP. Failures are logged and otherwise ignored.
///
/// Note: Signal handler setup failures are fatal - the webhook cannot honour
/// reload requests without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn reload_on_hangup(reload: ReloadHandle, cancel: CancellationToken) {
    #[cfg(unix)]
    {
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
            .expect("Failed to install SIGHUP handler");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = hangup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    info!(component = "configuration", "Received SIGHUP, reloading policy");
                    if let Err(e) = reload.reload().await {
                        warn!(component = "configuration", error = %e, "SIGHUP reload failed");
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = reload;
        cancel.cancelled().await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
