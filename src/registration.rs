//! Registration staleness signal
//!
//! Defining new objects changes what the client must advertise upstream. The
//! request engine only raises this flag; whoever runs the registration
//! handshake clears it with [`RegistrationFlag::take`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "registration is stale" flag
#[derive(Debug, Clone, Default)]
pub struct RegistrationFlag(Arc<AtomicBool>);

impl RegistrationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a registration update
    pub fn mark_stale(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether an update was pending
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}
