//! Runtime settings for the relay server

use crate::error::{RelayError, Result};
use shared::{DEFAULT_PORT, RESEND_THRESHOLD_MS, RETRY_TICK_MS};
use std::time::Duration;

/// Number of distinct steps kept by default before the oldest is evicted
pub const DEFAULT_STEP_HISTORY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind the UDP socket to
    pub host: String,
    pub port: u16,
    /// How long a sent packet waits for its acknowledgement before it is resent
    pub resend_threshold: Duration,
    /// Period of the retransmission scan
    pub retry_tick: Duration,
    /// Distinct steps retained by the aggregator; `None` keeps every step
    pub step_history: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            resend_threshold: Duration::from_millis(RESEND_THRESHOLD_MS),
            retry_tick: Duration::from_millis(RETRY_TICK_MS),
            step_history: Some(DEFAULT_STEP_HISTORY),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects timings the retry scan cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.retry_tick.is_zero() {
            return Err(RelayError::config("retry tick must be greater than zero"));
        }
        if self.resend_threshold.is_zero() {
            return Err(RelayError::config(
                "resend threshold must be greater than zero",
            ));
        }
        if self.resend_threshold < self.retry_tick {
            return Err(RelayError::config(format!(
                "resend threshold ({:?}) is shorter than the retry tick ({:?})",
                self.resend_threshold, self.retry_tick
            )));
        }
        if self.host.is_empty() {
            return Err(RelayError::config("host must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4242);
        assert_eq!(config.resend_threshold, Duration::from_millis(500));
        assert_eq!(config.retry_tick, Duration::from_millis(25));
        assert_eq!(config.step_history, Some(DEFAULT_STEP_HISTORY));
        assert_eq!(config.bind_addr(), "0.0.0.0:4242");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = ServerConfig {
            retry_tick: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config { .. })));
    }

    #[test]
    fn test_threshold_shorter_than_tick_rejected() {
        let config = ServerConfig {
            resend_threshold: Duration::from_millis(10),
            retry_tick: Duration::from_millis(25),
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config { .. })));
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = ServerConfig {
            host: String::new(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
