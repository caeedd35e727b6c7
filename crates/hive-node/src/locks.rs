use std::collections::HashMap;
use std::thread::{self, ThreadId};

use hive_core::Guid;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The calling thread already holds the lock for this key.
    #[error("lock for {0} is already held by this thread")]
    AlreadyHeld(Guid),
}

/// One exclusive lock per [`Guid`], created on demand.
///
/// Locks are not reentrant: a thread asking again for a key it holds gets
/// [`LockError::AlreadyHeld`] instead of deadlocking. Release happens when the
/// returned [`KeyGuard`] is dropped.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashMap<Guid, ThreadId>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then takes it.
    pub fn lock(&self, key: Guid) -> Result<KeyGuard<'_>, LockError> {
        let me = thread::current().id();
        let mut held = self.held.lock();
        loop {
            match held.get(&key) {
                None => {
                    held.insert(key, me);
                    return Ok(KeyGuard { locks: self, key });
                }
                Some(owner) if *owner == me => return Err(LockError::AlreadyHeld(key)),
                Some(_) => self.released.wait(&mut held),
            }
        }
    }

    /// Takes `key` only if nobody holds it.
    pub fn try_lock(&self, key: Guid) -> Option<KeyGuard<'_>> {
        let mut held = self.held.lock();
        if held.contains_key(&key) {
            return None;
        }
        held.insert(key, thread::current().id());
        Some(KeyGuard { locks: self, key })
    }

    pub fn is_locked(&self, key: &Guid) -> bool {
        self.held.lock().contains_key(key)
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, key: &Guid) {
        self.held.lock().remove(key);
        self.released.notify_all();
    }
}

/// Scoped ownership of one key in a [`KeyLocks`].
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: Guid,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> Guid {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
