//! # Maildrop
//!
//! Identity-addressed mailbox transport for process fleets.
//!
//! Each process registers a logical identity in a shared directory
//! service, maps it to a reachable `host:port`, and exchanges discrete
//! messages with peers by identity rather than by address. Peers come
//! and go; their bindings are resolved at send time through a
//! single-flight, TTL-bounded address cache and delivered over pooled
//! TCP connections carrying self-delimiting frames.
//!
//! This crate provides:
//! - **Mailbox**: registration, heartbeat, inbound listener, and the
//!   retrying send pipeline
//! - **AddressCache**: single-flight identity resolution with TTL expiry
//! - **ConnectionPool**: one live outbound connection per address
//! - **Frame codec**: `hex-length|payload` framing tolerant of arbitrary
//!   chunk boundaries
//! - **DirectoryClient**: the trait boundary to the expiring key-value
//!   directory, with an in-process implementation
//!
//! The runtime model is single-threaded and event-driven: shared state
//! is `Rc`-based and background work runs on `spawn_local`, so a mailbox
//! must be driven from a `LocalSet` on a current-thread runtime.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Single-flight, TTL-based address-resolution cache.
pub mod cache;

/// Mailbox and directory configuration.
pub mod config;

/// Directory service trait and in-process implementation.
pub mod directory;

/// Error types for the maildrop transport.
pub mod error;

/// Wire format for message framing.
pub mod frame;

mod listener;

/// The mailbox: component assembly and send pipeline.
pub mod mailbox;

/// Outbound connection pool.
pub mod pool;

/// Directory registration and heartbeat refresh.
pub mod registration;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::AddressCache;
pub use config::{DirectoryConfig, MailboxConfig};
pub use directory::{DirectoryClient, MemoryDirectory};
pub use error::{
    ConfigError, ConnectError, DirectoryError, MailboxError, MailboxResult, ResolveError,
};
pub use frame::{
    encode_frame, FrameDecoder, FrameError, DELIMITER, MAX_FRAMES_PER_FEED, MAX_LENGTH_DIGITS,
    MAX_PAYLOAD_SIZE,
};
pub use mailbox::{EventReceiver, Mailbox, MailboxEvent};
pub use pool::{ConnectionPool, PooledConnection};
pub use registration::RegistrationState;
