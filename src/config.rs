//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ServerError;

/// Default path to the policy file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/webhook/config/config.json";
/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8443";

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Minimum level logged for this crate's events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Mixed workload admission webhook
#[derive(Clone, Debug, Parser)]
#[command(name = "mixed-workload-webhook")]
#[command(about = "Mutating admission webhook tagging mixed workloads", long_about = None)]
#[command(version)]
pub struct Options {
    /// The address to listen on for the webhook and probes
    #[arg(
        long = "web.listen-address",
        env = "WEBHOOK_LISTEN_ADDRESS",
        default_value = DEFAULT_LISTEN_ADDRESS
    )]
    pub listen_address: String,

    /// Enable reload via HTTP request
    #[arg(long = "web.enable-lifecycle", env = "WEBHOOK_ENABLE_LIFECYCLE")]
    pub enable_lifecycle: bool,

    /// Serve plaintext HTTP instead of TLS (non-production only)
    #[arg(long = "web.insecure", env = "WEBHOOK_INSECURE")]
    pub insecure: bool,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(
        long = "web.shutdown-grace-period",
        env = "WEBHOOK_SHUTDOWN_GRACE_SECS",
        default_value_t = 5
    )]
    pub shutdown_grace_period_secs: u64,

    /// Path to the policy file
    #[arg(long = "config.file", env = "WEBHOOK_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// File containing the x509 certificate for HTTPS (CA cert, if any,
    /// concatenated after the server cert)
    #[arg(
        long = "tls.cert-file",
        env = "WEBHOOK_TLS_CERT_FILE",
        default_value = WEBHOOK_CERT_PATH
    )]
    pub tls_cert_file: PathBuf,

    /// File containing the x509 private key matching the certificate
    #[arg(
        long = "tls.private-key-file",
        env = "WEBHOOK_TLS_KEY_FILE",
        default_value = WEBHOOK_KEY_PATH
    )]
    pub tls_key_file: PathBuf,

    /// Log output format
    #[arg(
        long = "log.format",
        env = "WEBHOOK_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Json
    )]
    pub log_format: LogFormat,

    /// Only log messages with the given severity or above
    #[arg(
        long = "log.level",
        env = "WEBHOOK_LOG_LEVEL",
        value_enum,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,
}

impl Options {
    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listen_address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.listen_address.clone()))
    }

    /// Default `EnvFilter` directive; `RUST_LOG` can still add others
    pub fn log_directive(&self) -> String {
        format!("mixed_workload_webhook={}", self.log_level.as_str())
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Reject option combinations that cannot work before doing any I/O
    pub fn validate(&self) -> Result<(), String> {
        if self.shutdown_grace_period_secs == 0 {
            return Err("web.shutdown-grace-period must be at least 1 second".to_string());
        }
        self.listen_addr().map_err(|e| e.to_string())?;
        Ok(())
    }
}
