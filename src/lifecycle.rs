//! Server lifecycle state machine and the lifecycle HTTP API.
//!
//! ```text
//! Starting -> Ready -> Serving <-> Reloading
//!                         |            |
//!                         +-> Draining <-+ -> Stopped
//! ```
//!
//! Readiness is derived from the phase: the server is ready while `Serving`
//! or `Reloading`.

use std::fmt;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::policy::ReloadHandle;

/// Phases of a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecyclePhase {
    /// Loading the first policy snapshot
    #[default]
    Starting,
    /// First policy installed, not yet accepting traffic
    Ready,
    /// Accepting traffic
    Serving,
    /// Accepting traffic while a reload is in flight
    Reloading,
    /// Shutdown requested, finishing in-flight requests
    Draining,
    /// Terminal
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Starting => write!(f, "Starting"),
            LifecyclePhase::Ready => write!(f, "Ready"),
            LifecyclePhase::Serving => write!(f, "Serving"),
            LifecyclePhase::Reloading => write!(f, "Reloading"),
            LifecyclePhase::Draining => write!(f, "Draining"),
            LifecyclePhase::Stopped => write!(f, "Stopped"),
        }
    }
}

impl LifecyclePhase {
    /// Whether the readiness probe should pass in this phase
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecyclePhase::Serving | LifecyclePhase::Reloading)
    }
}

/// Events that move the lifecycle between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The mandatory first policy load succeeded
    PolicyLoaded,
    /// The first policy load failed
    StartupFailed,
    /// The listener is up and the reload loop is running
    ServingStarted,
    /// A reload was picked up by the coordinator
    ReloadStarted,
    /// The reload finished, successfully or not
    ReloadFinished,
    /// A termination signal was received
    ShutdownRequested,
    /// The server stopped
    ServerStopped,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::PolicyLoaded => write!(f, "PolicyLoaded"),
            LifecycleEvent::StartupFailed => write!(f, "StartupFailed"),
            LifecycleEvent::ServingStarted => write!(f, "ServingStarted"),
            LifecycleEvent::ReloadStarted => write!(f, "ReloadStarted"),
            LifecycleEvent::ReloadFinished => write!(f, "ReloadFinished"),
            LifecycleEvent::ShutdownRequested => write!(f, "ShutdownRequested"),
            LifecycleEvent::ServerStopped => write!(f, "ServerStopped"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LifecyclePhase,
    pub to: LifecyclePhase,
    pub event: LifecycleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LifecyclePhase,
        to: LifecyclePhase,
        event: LifecycleEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: LifecyclePhase,
        to: LifecyclePhase,
        event: LifecycleEvent,
        description: &'static str,
    },
    /// Transition was not valid for the current phase
    InvalidTransition {
        current: LifecyclePhase,
        event: LifecycleEvent,
    },
}

/// Transition table for the server lifecycle
pub struct LifecycleStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use LifecycleEvent as E;
        use LifecyclePhase as P;

        Self {
            transitions: vec![
                // === Starting ===
                Transition::new(P::Starting, P::Ready, E::PolicyLoaded, "Initial policy loaded"),
                Transition::new(
                    P::Starting,
                    P::Stopped,
                    E::StartupFailed,
                    "Initial policy load failed",
                ),
                Transition::new(
                    P::Starting,
                    P::Draining,
                    E::ShutdownRequested,
                    "Shutdown before first load",
                ),
                // === Ready ===
                Transition::new(P::Ready, P::Serving, E::ServingStarted, "Accepting traffic"),
                Transition::new(
                    P::Ready,
                    P::Draining,
                    E::ShutdownRequested,
                    "Shutdown before serving",
                ),
                Transition::new(P::Ready, P::Stopped, E::ServerStopped, "Listener failed to bind"),
                // === Serving ===
                Transition::new(
                    P::Serving,
                    P::Reloading,
                    E::ReloadStarted,
                    "Policy reload started",
                ),
                Transition::new(
                    P::Serving,
                    P::Draining,
                    E::ShutdownRequested,
                    "Draining in-flight requests",
                ),
                Transition::new(P::Serving, P::Stopped, E::ServerStopped, "Listener failed"),
                // === Reloading ===
                Transition::new(
                    P::Reloading,
                    P::Serving,
                    E::ReloadFinished,
                    "Policy reload finished",
                ),
                Transition::new(
                    P::Reloading,
                    P::Draining,
                    E::ShutdownRequested,
                    "Shutdown during reload",
                ),
                Transition::new(
                    P::Reloading,
                    P::Stopped,
                    E::ServerStopped,
                    "Listener failed during reload",
                ),
                // === Draining ===
                Transition::new(P::Draining, P::Stopped, E::ServerStopped, "Drain complete"),
                // Stopped is terminal
            ],
        }
    }

    /// Attempt to transition based on an event
    pub fn transition(&self, current: LifecyclePhase, event: LifecycleEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid
    pub fn can_transition(&self, from: LifecyclePhase, event: LifecycleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given phase
    pub fn valid_events(&self, phase: LifecyclePhase) -> Vec<LifecycleEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == phase)
            .map(|t| t.event)
            .collect()
    }
}

/// Current lifecycle phase shared between the serving loop, the reload
/// coordinator and the probes.
pub struct Lifecycle {
    machine: LifecycleStateMachine,
    phase: RwLock<LifecyclePhase>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: LifecycleStateMachine::new(),
            phase: RwLock::new(LifecyclePhase::Starting),
        }
    }

    pub async fn phase(&self) -> LifecyclePhase {
        *self.phase.read().await
    }

    /// Apply an event. Events that are not valid in the current phase are
    /// ignored, e.g. a reload finishing after shutdown started.
    pub async fn apply(&self, event: LifecycleEvent) -> TransitionResult {
        let mut phase = self.phase.write().await;
        let result = self.machine.transition(*phase, event);
        match &result {
            TransitionResult::Success { from, to, description, .. } => {
                debug!(from = %from, to = %to, event = %event, "{}", description);
                *phase = *to;
            }
            TransitionResult::InvalidTransition { current, event } => {
                debug!(phase = %current, event = %event, "Ignoring lifecycle event");
            }
        }
        result
    }
}

/// Shared state for the lifecycle API
pub struct LifecycleApiState {
    reload: ReloadHandle,
    enabled: bool,
}

impl LifecycleApiState {
    pub fn new(reload: ReloadHandle, enabled: bool) -> Self {
        Self { reload, enabled }
    }
}

/// Trigger a reload and wait for its outcome
async fn reload(State(state): State<Arc<LifecycleApiState>>) -> Response {
    if !state.enabled {
        warn!(component = "web", "Reload requested but lifecycle API is disabled");
        return (StatusCode::FORBIDDEN, "Lifecycle API is not enabled.").into_response();
    }

    info!(component = "web", "Reload requested via lifecycle API");
    match state.reload.reload().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!(component = "web", error = %e, "Reload via lifecycle API failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to reload config: {}", e),
            )
                .into_response()
        }
    }
}

/// Create the lifecycle API router
pub fn create_router(state: Arc<LifecycleApiState>) -> Router {
    Router::new()
        .route("/-/reload", post(reload).put(reload))
        .with_state(state)
}
