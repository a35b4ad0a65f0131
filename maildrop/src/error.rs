//! Error types for the maildrop transport.

use std::time::Duration;

use thiserror::Error;

use crate::frame::FrameError;

/// Errors reported by the directory service.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The directory rejected or failed the operation.
    #[error("directory operation failed: {0}")]
    OperationFailed(String),
}

/// Errors produced while resolving an identity to an address.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The identity has no live registration in the directory.
    #[error("no live registration for identity '{identity}'")]
    NotFound {
        /// The identity that was looked up.
        identity: String,
    },

    /// The directory lookup itself failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Errors produced while establishing or using a pooled connection.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// Connection establishment exceeded the connect timeout.
    #[error("connect to {address} timed out")]
    Timeout {
        /// The address that was being connected to.
        address: String,
    },

    /// Connection establishment or a write failed at the socket level.
    #[error("connection to {address} failed: {message}")]
    Io {
        /// The address of the failing connection.
        address: String,
        /// Stringified I/O error detail.
        message: String,
    },

    /// The pooled connection was evicted before the operation completed.
    #[error("connection lost")]
    ConnectionLost,
}

/// Errors detected while validating a [`MailboxConfig`](crate::MailboxConfig).
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The refresh interval is not materially shorter than the TTL, so a
    /// directory entry could expire between two refreshes.
    #[error("refresh interval {refresh:?} must be shorter than ttl {ttl:?}")]
    RefreshNotBelowTtl {
        /// Configured refresh interval.
        refresh: Duration,
        /// Configured registration TTL.
        ttl: Duration,
    },
}

/// Top-level errors surfaced by a [`Mailbox`](crate::Mailbox).
#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    /// The configuration failed startup validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The inbound listener could not be bound.
    #[error("failed to bind listener on {address}: {message}")]
    Bind {
        /// The address that was being bound.
        address: String,
        /// Stringified I/O error detail.
        message: String,
    },

    /// Publishing the identity registration failed during startup.
    #[error("registration failed: {0}")]
    Registration(DirectoryError),

    /// The retry budget for a send was exhausted.
    #[error("delivery to '{identity}' failed after {attempts} attempts: {last_error}")]
    DeliveryFailed {
        /// The destination identity.
        identity: String,
        /// Total attempts made, including the first.
        attempts: u32,
        /// Stringified error from the final attempt.
        last_error: String,
    },

    /// A payload could not be encoded into a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An inbound connection carried a malformed frame stream.
    ///
    /// Fatal to that single connection only; the listener and all other
    /// connections keep running.
    #[error("protocol error on connection from {peer}: {source}")]
    Protocol {
        /// Remote address of the offending connection.
        peer: String,
        /// The framing error that was detected.
        source: FrameError,
    },

    /// A heartbeat refresh failed. Non-fatal; the registration degrades to
    /// eventual expiry if refreshes keep failing.
    #[error("heartbeat refresh failed: {0}")]
    Refresh(DirectoryError),

    /// The inbound listener failed to accept a connection.
    #[error("listener error: {0}")]
    Listener(String),
}

/// Result type for mailbox operations.
pub type MailboxResult<T> = Result<T, MailboxError>;
