use std::sync::{Arc, Mutex};

use crate::{errors::Error, messaging::port::RelaySession, Result};

/// A session drawn from the pool for one attempt.
#[derive(Clone)]
pub struct Identity {
    /// Position in the pool, stable for the pool's lifetime.
    pub slot: usize,
    pub session: Arc<dyn RelaySession>,
}

impl Identity {
    pub fn label(&self) -> &str {
        self.session.label()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("slot", &self.slot)
            .field("label", &self.label())
            .finish()
    }
}

/// Fixed set of authenticated sessions handed out round-robin.
///
/// No health tracking: a broken session is only noticed by the attempt that
/// uses it, and the next acquisition simply rotates past it.
pub struct IdentityPool {
    sessions: Vec<Arc<dyn RelaySession>>,
    next: Mutex<usize>,
}

impl IdentityPool {
    pub fn new(sessions: Vec<Arc<dyn RelaySession>>) -> Self {
        Self {
            sessions,
            next: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.label().to_string()).collect()
    }

    /// Next session in rotation.
    ///
    /// The index is read and advanced under one lock, so concurrent callers
    /// never observe a skipped or torn index.
    pub fn acquire(&self) -> Result<Identity> {
        if self.sessions.is_empty() {
            return Err(Error::NoIdentities);
        }

        let slot = {
            // The guarded value is a plain index; a poisoned lock still holds a valid one.
            let mut next = self.next.lock().unwrap_or_else(|p| p.into_inner());
            let slot = *next % self.sessions.len();
            *next = (slot + 1) % self.sessions.len();
            slot
        };

        Ok(Identity {
            slot,
            session: Arc::clone(&self.sessions[slot]),
        })
    }
}
