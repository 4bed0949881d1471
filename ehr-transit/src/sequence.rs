//! Stale-result guard for abandoned operations.
//!
//! In-flight requests are not cancelled when the caller moves on, so each
//! extended operation takes a ticket from a monotonically increasing counter.
//! A result is only accepted while its ticket is still the newest one issued;
//! anything older is discarded instead of being applied to a later operation.

use crate::error::{TransitError, TransitResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues tickets and validates results against the newest one.
#[derive(Clone, Debug, Default)]
pub struct Sequencer {
    latest: Arc<AtomicU64>,
}

/// Identifies one operation issued by a [`Sequencer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new operation, superseding every earlier ticket.
    pub fn begin(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Newest ticket issued so far (0 before the first `begin`).
    pub fn current(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.current() == ticket.0
    }

    /// Passes `value` through if `ticket` is still current.
    pub fn accept<T>(&self, ticket: Ticket, value: T) -> TransitResult<T> {
        let current = self.current();
        if current == ticket.0 {
            Ok(value)
        } else {
            Err(TransitError::Superseded {
                ticket: ticket.0,
                current,
            })
        }
    }
}
