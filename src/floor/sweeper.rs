//! Expiry Sweeper — decides when a floor holder must be forcibly released.
//!
//! Holders can crash or hang without calling release; without a sweep a dead
//! holder permanently starves its conversation. The sweep is modeled as a
//! pure function of (now, grant time, holder liveness) and is evaluated
//! lazily: the manager runs it whenever `request_floor`, `release_floor`, or
//! `get_holder` touches a conversation, which meets the contract that no
//! conversation stays blocked on a stale holder past its threshold once
//! anyone looks at it.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Why a holder was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Held the floor longer than the configured maximum.
    HoldExpired,
    /// Failed the registry liveness predicate.
    HolderNotLive,
}

/// Decide whether the current holder must be evicted.
///
/// `holder_alive` is the registry's liveness verdict for the holder; it is
/// only consulted when liveness enforcement is on.
pub fn check_holder(
    now: DateTime<Utc>,
    granted_at: DateTime<Utc>,
    max_hold: Duration,
    holder_alive: bool,
    enforce_liveness: bool,
) -> Option<EvictReason> {
    if enforce_liveness && !holder_alive {
        return Some(EvictReason::HolderNotLive);
    }
    let held_for = now.signed_duration_since(granted_at);
    if held_for.num_milliseconds() > max_hold.as_millis() as i64 {
        return Some(EvictReason::HoldExpired);
    }
    None
}
