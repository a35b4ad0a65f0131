//! Single-flight, TTL-based address-resolution cache.
//!
//! Sits in front of the directory and bounds how often an identity is
//! looked up: a fresh entry is served from memory, a miss issues exactly
//! one directory query no matter how many resolves race on it, and
//! failures are never cached.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::directory::DirectoryClient;
use crate::error::ResolveError;

/// Cache mapping identity to `host:port`, a lagging TTL-bounded view of
/// the directory.
///
/// Cloning shares the underlying cache state.
#[derive(Clone)]
pub struct AddressCache {
    directory: Rc<dyn DirectoryClient>,
    key_prefix: String,
    ttl: Duration,
    state: Rc<RefCell<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// At most one in-flight directory lookup per identity; concurrent
    /// resolves share the pending entry and its eventual result.
    pending: HashMap<String, Rc<PendingLookup>>,
}

struct CacheEntry {
    address: String,
    inserted_at: Instant,
}

struct PendingLookup {
    done: Notify,
    result: RefCell<Option<Result<String, ResolveError>>>,
}

/// Outcome of the fast-path cache inspection.
enum Plan {
    Hit(String),
    Wait(Rc<PendingLookup>),
    Fetch(Rc<PendingLookup>),
}

impl AddressCache {
    /// Create a cache over `directory`. Entries live for `ttl`; a zero
    /// TTL means entries never expire (matching a registration without
    /// expiration).
    pub fn new(directory: Rc<dyn DirectoryClient>, key_prefix: String, ttl: Duration) -> Self {
        Self {
            directory,
            key_prefix,
            ttl,
            state: Rc::new(RefCell::new(CacheState::default())),
        }
    }

    /// Resolve an identity to its current address.
    ///
    /// Serves fresh cache entries directly. On a miss, issues one
    /// directory lookup; resolves racing on the same identity all await
    /// that lookup and share its result. Successful lookups are cached
    /// until the TTL elapses; failures are re-attempted on the next call.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotFound`]: the identity has no live
    ///   registration
    /// - [`ResolveError::Directory`]: the directory could not answer
    pub async fn resolve(&self, identity: &str) -> Result<String, ResolveError> {
        let plan = {
            let mut state = self.state.borrow_mut();

            let cached = state
                .entries
                .get(identity)
                .map(|entry| (self.is_fresh(entry), entry.address.clone()));
            let fresh = match cached {
                Some((true, address)) => Some(address),
                Some((false, _)) => {
                    state.entries.remove(identity);
                    None
                }
                None => None,
            };

            match fresh {
                Some(address) => Plan::Hit(address),
                None => match state.pending.get(identity).cloned() {
                    Some(pending) => Plan::Wait(pending),
                    None => {
                        let pending = Rc::new(PendingLookup {
                            done: Notify::new(),
                            result: RefCell::new(None),
                        });
                        state
                            .pending
                            .insert(identity.to_string(), pending.clone());
                        Plan::Fetch(pending)
                    }
                },
            }
        };

        match plan {
            Plan::Hit(address) => {
                tracing::debug!("address cache hit for '{}': {}", identity, address);
                Ok(address)
            }
            Plan::Wait(pending) => {
                tracing::debug!("joining in-flight lookup for '{}'", identity);
                loop {
                    let notified = pending.done.notified();
                    if let Some(result) = pending.result.borrow().clone() {
                        return result;
                    }
                    notified.await;
                }
            }
            Plan::Fetch(pending) => {
                let result = self.lookup(identity).await;

                {
                    let mut state = self.state.borrow_mut();
                    state.pending.remove(identity);
                    if let Ok(address) = &result {
                        state.entries.insert(
                            identity.to_string(),
                            CacheEntry {
                                address: address.clone(),
                                inserted_at: Instant::now(),
                            },
                        );
                    }
                }

                // Publish before waking so late waiters always see a result.
                *pending.result.borrow_mut() = Some(result.clone());
                pending.done.notify_waiters();
                result
            }
        }
    }

    /// Remove a cached address regardless of TTL.
    ///
    /// Used after a connection failure that may indicate the cached
    /// address is stale; the next resolve goes back to the directory.
    pub fn invalidate(&self, identity: &str) {
        if self.state.borrow_mut().entries.remove(identity).is_some() {
            tracing::debug!("invalidated cached address for '{}'", identity);
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.ttl.is_zero() || entry.inserted_at.elapsed() < self.ttl
    }

    async fn lookup(&self, identity: &str) -> Result<String, ResolveError> {
        let key = format!("{}{}", self.key_prefix, identity);
        match self.directory.get(&key).await? {
            Some(address) => {
                tracing::debug!("resolved '{}' to {}", identity, address);
                Ok(address)
            }
            None => Err(ResolveError::NotFound {
                identity: identity.to_string(),
            }),
        }
    }
}
