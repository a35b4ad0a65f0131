//! The mailbox: assembly of cache, pool, codec, listener, and
//! registration, plus the send pipeline.

use std::rc::Rc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::AddressCache;
use crate::config::MailboxConfig;
use crate::directory::DirectoryClient;
use crate::error::{ConnectError, MailboxError, ResolveError};
use crate::frame::encode_frame;
use crate::listener::accept_loop;
use crate::pool::ConnectionPool;
use crate::registration::{Registrar, RegistrationState};

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum MailboxEvent {
    /// Registration succeeded; the instance is externally reachable at
    /// the advertised address.
    Ready {
        /// The advertised `host:port`.
        address: String,
    },

    /// One decoded inbound message payload. The transport carries no
    /// sender identity; any sender identification lives inside the
    /// payload.
    Message(Vec<u8>),

    /// A failure that was not locally recoverable (protocol error on an
    /// inbound connection, listener accept failure, heartbeat refresh
    /// failure).
    Error(MailboxError),
}

/// Receiving half of the event channel, taken once via
/// [`Mailbox::take_events`].
pub type EventReceiver = mpsc::UnboundedReceiver<MailboxEvent>;

/// One failed pass through the send pipeline; every variant is
/// recoverable by invalidate + retry.
#[derive(Debug, Clone, Error)]
enum AttemptError {
    #[error(transparent)]
    Resolve(ResolveError),
    #[error(transparent)]
    Connect(ConnectError),
}

/// A registered mailbox instance.
///
/// Listens for inbound messages, keeps its directory entry alive, and
/// sends discrete payloads to other instances addressed by identity.
///
/// All shared state is single-threaded (`Rc`-based); construct and drive
/// a `Mailbox` from within a `LocalSet` on a current-thread runtime.
pub struct Mailbox {
    identity: String,
    local_address: String,
    config: MailboxConfig,
    cache: AddressCache,
    pool: ConnectionPool,
    registrar: Registrar,
    events_rx: Option<EventReceiver>,
    accept_shutdown_tx: mpsc::UnboundedSender<()>,
    accept_handle: Option<JoinHandle<()>>,
    refresh: Option<(mpsc::UnboundedSender<()>, JoinHandle<()>)>,
}

impl Mailbox {
    /// Bind, register, and start a mailbox instance.
    ///
    /// Binds the listener on `advertise_host:listen_port` (port 0 picks
    /// an ephemeral port), publishes the advertised address to the
    /// directory, spawns the accept loop and — when configured — the
    /// heartbeat refresh task, and queues a [`MailboxEvent::Ready`] on
    /// the event channel.
    ///
    /// # Errors
    ///
    /// - [`MailboxError::Config`]: the configuration failed validation
    /// - [`MailboxError::Bind`]: the listener could not be bound
    /// - [`MailboxError::Registration`]: publishing the directory entry
    ///   failed; the instance is not usable
    pub async fn start(
        config: MailboxConfig,
        directory: Rc<dyn DirectoryClient>,
    ) -> Result<Self, MailboxError> {
        config.validate()?;

        let identity = config
            .identity
            .clone()
            .unwrap_or_else(generate_identity);

        let bind_address = format!("{}:{}", config.advertise_host, config.listen_port);
        let listener = TcpListener::bind(&bind_address).await.map_err(|e| {
            MailboxError::Bind {
                address: bind_address.clone(),
                message: e.to_string(),
            }
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| MailboxError::Bind {
                address: bind_address.clone(),
                message: e.to_string(),
            })?
            .port();
        let local_address = format!("{}:{}", config.advertise_host, port);
        tracing::info!("mailbox '{}' listening on {}", identity, local_address);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let registrar = Registrar::new(
            directory.clone(),
            config.directory_key(&identity),
            local_address.clone(),
            config.ttl,
            config.refresh_interval,
        );
        registrar
            .register()
            .await
            .map_err(MailboxError::Registration)?;
        let refresh = registrar.spawn_refresh(events_tx.clone());

        let (accept_shutdown_tx, accept_shutdown_rx) = mpsc::unbounded_channel();
        let accept_handle = tokio::task::spawn_local(accept_loop(
            listener,
            events_tx.clone(),
            accept_shutdown_rx,
        ));

        let cache = AddressCache::new(
            directory,
            config.directory.key_prefix.clone(),
            config.ttl,
        );
        let pool = ConnectionPool::new(config.connect_timeout);

        // Queued on the unbounded channel, so a receiver taken later
        // still observes it.
        let _ = events_tx.send(MailboxEvent::Ready {
            address: local_address.clone(),
        });

        Ok(Self {
            identity,
            local_address,
            config,
            cache,
            pool,
            registrar,
            events_rx: Some(events_rx),
            accept_shutdown_tx,
            accept_handle: Some(accept_handle),
            refresh,
        })
    }

    /// The identity this instance registered under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The advertised `host:port` of this instance.
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Current registration lifecycle state.
    pub fn registration_state(&self) -> RegistrationState {
        self.registrar.state()
    }

    /// Take ownership of the event channel receiver.
    ///
    /// Events queued before the take (including `Ready`) are retained.
    /// Returns `None` on a second call.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    /// Send one message payload to the instance registered as `identity`.
    ///
    /// Resolves the identity through the address cache, acquires a
    /// pooled connection, and writes the encoded frame. Resolution,
    /// connect, and write failures invalidate the cached address and
    /// retry after `retry_backoff`, up to `max_send_retries` retries. A
    /// successful write completes the call; delivery to the peer's
    /// application layer is not confirmed.
    ///
    /// # Errors
    ///
    /// - [`MailboxError::Frame`]: the payload exceeds the frame size cap
    ///   (not retried)
    /// - [`MailboxError::DeliveryFailed`]: the retry budget was exhausted
    pub async fn send(&self, identity: &str, payload: &[u8]) -> Result<(), MailboxError> {
        let frame = encode_frame(payload)?;

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.try_send(identity, &frame).await {
                Ok(()) => {
                    tracing::debug!(
                        "delivered {} bytes to '{}' on attempt {}",
                        payload.len(),
                        identity,
                        attempts
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("send to '{}' attempt {} failed: {}", identity, attempts, e);
                    // The cached address may be stale whether resolution,
                    // connect, or write failed.
                    self.cache.invalidate(identity);

                    if attempts > self.config.max_send_retries {
                        return Err(MailboxError::DeliveryFailed {
                            identity: identity.to_string(),
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    /// One pass through the pipeline: resolve, acquire, write.
    async fn try_send(&self, identity: &str, frame: &[u8]) -> Result<(), AttemptError> {
        let address = self
            .cache
            .resolve(identity)
            .await
            .map_err(AttemptError::Resolve)?;
        let connection = self
            .pool
            .acquire(&address)
            .await
            .map_err(AttemptError::Connect)?;
        connection
            .write(frame.to_vec())
            .await
            .map_err(AttemptError::Connect)
    }

    /// Shut down the listener and heartbeat.
    ///
    /// Inbound connections are dropped; the directory entry is left to
    /// expire on its own (there is no explicit unregister).
    pub async fn close(&mut self) {
        let _ = self.accept_shutdown_tx.send(());
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.await;
        }

        if let Some((shutdown_tx, handle)) = self.refresh.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }

        tracing::info!("mailbox '{}' closed", self.identity);
    }
}

/// Generate a process-unique identity for instances that did not supply
/// one.
fn generate_identity() -> String {
    format!("mailbox-{:016x}", rand::random::<u64>())
}
