//! Admission control for new reservations.

use chrono::{DateTime, Utc};

use crate::model::{BlockingLease, Lease, LeaseMode};
use crate::pattern::Pattern;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Conflict(Vec<BlockingLease>),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Whether a lease held in `held` mode stops a request in `requested` mode.
/// Only shared-with-shared coexists.
pub fn modes_conflict(requested: LeaseMode, held: LeaseMode) -> bool {
    !(requested == LeaseMode::Shared && held == LeaseMode::Shared)
}

/// Whether any of `lease`'s patterns overlaps any of `requested`.
///
/// A stored pattern that no longer parses is treated as overlapping.
pub fn lease_overlaps(lease: &Lease, requested: &[Pattern]) -> bool {
    lease.patterns.iter().any(|held| match Pattern::parse(held) {
        Ok(held) => requested.iter().any(|r| r.overlaps(&held)),
        Err(_) => true,
    })
}

/// Decide a reservation against every lease of the project.
///
/// Expired leases and the requester's own leases are ignored. Every
/// blocking lease is reported once, in the order the store returned them.
pub fn evaluate(
    holder: &str,
    requested: &[Pattern],
    mode: LeaseMode,
    leases: &[Lease],
    now: DateTime<Utc>,
) -> Decision {
    let blocking: Vec<BlockingLease> = leases
        .iter()
        .filter(|l| l.is_active(now))
        .filter(|l| l.holder != holder)
        .filter(|l| modes_conflict(mode, l.mode))
        .filter(|l| lease_overlaps(l, requested))
        .map(BlockingLease::from)
        .collect();

    if blocking.is_empty() {
        Decision::Granted
    } else {
        Decision::Conflict(blocking)
    }
}
