//! One-shot synchronization event
//!
//! An [`Event`] starts unsignalled, is signalled exactly once, and releases
//! every waiter when it is. Waiting has no timeout and there is no
//! cancellation; a waiter blocks until some thread signals.

use crate::{CompilerError, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event created already signalled
    pub fn signalled() -> Self {
        Self {
            signalled: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    /// Signal the event and wake every waiter.
    ///
    /// A second signal is an `InvalidState` error.
    pub fn signal(&self) -> Result<()> {
        let mut signalled = self.signalled.lock();
        if *signalled {
            return Err(CompilerError::InvalidState("event is already signalled".to_string()));
        }
        *signalled = true;
        self.cond.notify_all();
        Ok(())
    }

    /// Block until the event is signalled
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
    }

    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }
}
