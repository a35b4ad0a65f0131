//! Configuration for a mailbox instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Location and key namespace of the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory host to connect to.
    pub host: String,

    /// Directory port to connect to.
    pub port: u16,

    /// Prefix prepended to every directory key used by maildrop.
    pub key_prefix: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            key_prefix: "maildrop:".to_string(),
        }
    }
}

/// Configuration for a [`Mailbox`](crate::Mailbox).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Identity to register under. `None` generates a process-unique one.
    pub identity: Option<String>,

    /// Hostname or IP that peers should use to reach this instance.
    pub advertise_host: String,

    /// Port to listen on. `0` selects an ephemeral port.
    pub listen_port: u16,

    /// Directory service location and key namespace.
    pub directory: DirectoryConfig,

    /// Expiration applied to this instance's directory entry.
    ///
    /// `Duration::ZERO` registers without expiration and disables the
    /// heartbeat; the directory key then outlives the process.
    pub ttl: Duration,

    /// Interval between heartbeat refreshes of the directory entry.
    ///
    /// Must be materially shorter than `ttl`. `Duration::ZERO` disables
    /// refreshing.
    pub refresh_interval: Duration,

    /// Number of retries after a failed send attempt.
    pub max_send_retries: u32,

    /// Fixed delay between send attempts.
    pub retry_backoff: Duration,

    /// Timeout for establishing an outbound connection.
    pub connect_timeout: Duration,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            identity: None,
            advertise_host: "127.0.0.1".to_string(),
            listen_port: 0,
            directory: DirectoryConfig::default(),
            ttl: Duration::from_secs(120),
            refresh_interval: Duration::from_secs(60),
            max_send_retries: 3,
            retry_backoff: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl MailboxConfig {
    /// Set the identity to register under.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the advertised host and listen port.
    pub fn with_address(mut self, advertise_host: impl Into<String>, listen_port: u16) -> Self {
        self.advertise_host = advertise_host.into();
        self.listen_port = listen_port;
        self
    }

    /// Set the registration TTL and heartbeat refresh interval.
    pub fn with_ttl(mut self, ttl: Duration, refresh_interval: Duration) -> Self {
        self.ttl = ttl;
        self.refresh_interval = refresh_interval;
        self
    }

    /// Set the send retry budget and backoff delay.
    pub fn with_retry_policy(mut self, max_send_retries: u32, retry_backoff: Duration) -> Self {
        self.max_send_retries = max_send_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    /// Set the outbound connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Validate the configuration at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RefreshNotBelowTtl`] when both durations are
    /// positive and the refresh interval is not shorter than the TTL; such
    /// a configuration would let the directory entry expire between two
    /// refreshes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ttl.is_zero()
            && !self.refresh_interval.is_zero()
            && self.refresh_interval >= self.ttl
        {
            return Err(ConfigError::RefreshNotBelowTtl {
                refresh: self.refresh_interval,
                ttl: self.ttl,
            });
        }
        Ok(())
    }

    /// Directory key for the given identity (`key_prefix + identity`).
    pub fn directory_key(&self, identity: &str) -> String {
        format!("{}{}", self.directory.key_prefix, identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        MailboxConfig::default().validate().expect("valid");
    }

    #[test]
    fn refresh_longer_than_ttl_is_rejected() {
        let config = MailboxConfig::default()
            .with_ttl(Duration::from_secs(10), Duration::from_secs(30));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RefreshNotBelowTtl { .. })
        ));
    }

    #[test]
    fn refresh_equal_to_ttl_is_rejected() {
        let config = MailboxConfig::default()
            .with_ttl(Duration::from_secs(10), Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ttl_disables_expiry_validation() {
        let config =
            MailboxConfig::default().with_ttl(Duration::ZERO, Duration::from_secs(60));
        config.validate().expect("zero ttl registers forever");
    }

    #[test]
    fn zero_refresh_disables_heartbeat_validation() {
        let config =
            MailboxConfig::default().with_ttl(Duration::from_secs(10), Duration::ZERO);
        config.validate().expect("refresh disabled");
    }

    #[test]
    fn directory_key_is_prefixed() {
        let config = MailboxConfig::default();
        assert_eq!(config.directory_key("alice"), "maildrop:alice");
    }
}
