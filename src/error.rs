//! Error types for the webhook.
//!
//! Errors are split by the component that produces them so that each surface
//! (policy reload, admission mutation, serving loop) can map them to its own
//! response format.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for loading and installing policy snapshots
#[derive(Error, Debug)]
pub enum PolicyError {
    /// The policy file could not be read
    #[error("failed to read policy file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The policy file is not a JSON array of rules
    #[error("failed to parse policy file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A subscriber rejected the newly installed snapshot.
    /// The snapshot stays installed when this is returned.
    #[error("policy subscriber failed: {0}")]
    Subscriber(#[source] SubscriberError),
}

/// Error reported by a policy subscriber callback
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for the reload handshake
#[derive(Error, Debug)]
pub enum ReloadError {
    /// The reload itself failed
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The reload loop is no longer accepting requests (shutdown in progress)
    #[error("reload coordinator is not running")]
    CoordinatorGone,
}

/// Error type for a single admission mutation
#[derive(Error, Debug)]
pub enum MutateError {
    /// The admission review envelope could not be decoded
    #[error("{0}")]
    Decode(String),

    /// The embedded object could not be decoded as the declared kind
    #[error("{0}")]
    InvalidObject(#[from] serde_json::Error),

    /// The admission request carried no object
    #[error("admission request has no object")]
    MissingObject,

    /// The workload kind is not handled by this webhook
    #[error("can't handle the kind({0}) object")]
    UnsupportedKind(String),

    /// The generated patch could not be serialized
    #[error("failed to encode patch: {0}")]
    PatchEncode(#[from] kube::core::admission::SerializePatchError),
}

impl MutateError {
    /// Status code carried in the admission result, if any.
    ///
    /// Envelope decode failures carry only a message; everything the mutation
    /// itself rejects is reported as a bad request.
    pub fn code(&self) -> Option<u16> {
        match self {
            MutateError::Decode(_) => None,
            MutateError::InvalidObject(_)
            | MutateError::MissingObject
            | MutateError::UnsupportedKind(_)
            | MutateError::PatchEncode(_) => Some(400),
        }
    }
}

/// Errors that can occur when running the HTTP server
#[derive(Error, Debug)]
pub enum ServerError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// The listen address is not a valid socket address
    #[error("invalid listen address {0}")]
    InvalidAddress(String),

    /// Server error
    #[error("webhook server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result type alias for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
