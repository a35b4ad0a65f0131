//! In-process directory implementation with real expiry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::directory::DirectoryClient;
use crate::error::DirectoryError;

/// In-memory [`DirectoryClient`] for tests and single-host deployments.
///
/// Entries expire lazily: an entry past its deadline is removed the next
/// time it is read. Cloning shares the underlying store, so several
/// mailboxes in one process can register against the same directory.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    entries: Rc<RefCell<HashMap<String, Entry>>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl DirectoryClient for MemoryDirectory {
    async fn get(&self, key: &str) -> Result<Option<String>, DirectoryError> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DirectoryError> {
        self.entries.borrow_mut().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DirectoryError> {
        if let Some(entry) = self.entries.borrow_mut().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}
