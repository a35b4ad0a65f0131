//! Directory registration and heartbeat refresh.
//!
//! After a successful listen, the instance publishes its advertised
//! address under `key_prefix + identity` and keeps the entry alive by
//! periodically re-applying its expiration. There is no explicit
//! unregister: a dead process simply stops refreshing and the entry
//! expires.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::directory::DirectoryClient;
use crate::error::{DirectoryError, MailboxError};
use crate::mailbox::MailboxEvent;

/// Lifecycle of an instance's directory registration.
///
/// Progresses `Unbound -> Listening -> Registered -> Refreshing` and is
/// terminal only on process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No listener bound yet.
    Unbound,
    /// Listening, registration not yet published.
    Listening,
    /// Directory entry published; externally observable as ready.
    Registered,
    /// Periodic refresh task running.
    Refreshing,
}

/// Publishes and maintains one instance's directory entry.
pub(crate) struct Registrar {
    directory: Rc<dyn DirectoryClient>,
    key: String,
    address: String,
    ttl: Duration,
    refresh_interval: Duration,
    state: Rc<Cell<RegistrationState>>,
}

impl Registrar {
    pub(crate) fn new(
        directory: Rc<dyn DirectoryClient>,
        key: String,
        address: String,
        ttl: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            directory,
            key,
            address,
            ttl,
            refresh_interval,
            state: Rc::new(Cell::new(RegistrationState::Listening)),
        }
    }

    pub(crate) fn state(&self) -> RegistrationState {
        self.state.get()
    }

    /// Publish the `identity -> address` entry and apply its TTL.
    ///
    /// A zero TTL registers without expiration (the entry outlives the
    /// process).
    pub(crate) async fn register(&self) -> Result<(), DirectoryError> {
        self.directory.set(&self.key, &self.address).await?;
        if !self.ttl.is_zero() {
            self.directory.expire(&self.key, self.ttl).await?;
        }
        self.state.set(RegistrationState::Registered);
        tracing::info!("registered '{}' at {}", self.key, self.address);
        Ok(())
    }

    /// Spawn the periodic refresh task, if refreshing is enabled.
    ///
    /// Refresh failures are logged and reported on the event channel but
    /// never tear down the listener; a persistently failing refresh
    /// degrades to eventual directory-entry expiry.
    pub(crate) fn spawn_refresh(
        &self,
        events: mpsc::UnboundedSender<MailboxEvent>,
    ) -> Option<(mpsc::UnboundedSender<()>, JoinHandle<()>)> {
        if self.ttl.is_zero() || self.refresh_interval.is_zero() {
            return None;
        }

        self.state.set(RegistrationState::Refreshing);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_local(refresh_task(
            self.directory.clone(),
            self.key.clone(),
            self.ttl,
            self.refresh_interval,
            events,
            shutdown_rx,
        ));
        Some((shutdown_tx, handle))
    }
}

/// Background task re-applying the directory entry's expiration.
async fn refresh_task(
    directory: Rc<dyn DirectoryClient>,
    key: String,
    ttl: Duration,
    refresh_interval: Duration,
    events: mpsc::UnboundedSender<MailboxEvent>,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("refresh task for '{}' shutting down", key);
                return;
            }
            _ = tokio::time::sleep(refresh_interval) => {}
        }

        match directory.expire(&key, ttl).await {
            Ok(()) => tracing::debug!("refreshed '{}'", key),
            Err(e) => {
                tracing::warn!("heartbeat refresh for '{}' failed: {}", key, e);
                let _ = events.send(MailboxEvent::Error(MailboxError::Refresh(e)));
            }
        }
    }
}
