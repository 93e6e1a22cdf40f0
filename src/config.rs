//! Configuration for nats-gather
//!
//! CLI arguments and environment variable handling using clap, plus the
//! library-level [`ClientConfig`] they resolve into.

use clap::Parser;
use std::time::Duration;

use crate::types::{GatherError, Result};

/// Default ping interval for keep-alive
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Default timeout for establishing the connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for single-reply requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Client name reported to the server
    #[arg(long, env = "NATS_CLIENT_NAME", default_value = "nats-gather")]
    pub client_name: String,

    /// Connection timeout in milliseconds
    #[arg(long, env = "NATS_CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,
}

impl NatsArgs {
    /// Resolve into a client configuration
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            nats_url: self.nats_url.clone(),
            user: self.nats_user.clone(),
            password: self.nats_password.clone(),
            name: self.client_name.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..Default::default()
        }
    }
}

/// Gather window configuration
#[derive(Parser, Debug, Clone)]
pub struct GatherArgs {
    /// How long to collect replies, in milliseconds
    #[arg(long, env = "GATHER_TIMEOUT_MS", default_value = "1000")]
    pub timeout_ms: u64,
}

impl GatherArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// NATS server URL(s), comma separated
    pub nats_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Client name for the server and for logging
    pub name: String,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Timeout used by single-reply requests
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            user: None,
            password: None,
            name: "nats-gather".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Set the request timeout for single-reply requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the client name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nats_url.trim().is_empty() {
            return Err(GatherError::Config("NATS_URL must not be empty".to_string()));
        }

        if self.user.is_some() != self.password.is_some() {
            return Err(GatherError::Config(
                "NATS_USER and NATS_PASSWORD must be set together".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(GatherError::Config(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(GatherError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
