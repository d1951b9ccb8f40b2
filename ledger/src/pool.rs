use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_types::ids::{BookingId, ShareClassId};

use crate::{booking::Booking, holding::Holding, holding::HoldingSource};

/// Authoritative counters for one fungible share class.
///
/// `available_shares` is a cached derivation; [`recompute_availability`] is
/// the single source of truth for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharePool {
    pub id: ShareClassId,
    pub name: String,
    pub total_shares: u64,
    /// Supply set aside for non-market allocation.
    pub reserved_shares: u64,
    /// Portion of the reserve already issued to holders.
    pub reserved_issued: u64,
    pub available_shares: u64,
    /// Optimistic guard; bumped on every persisted write.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SharePool {
    pub fn new(id: ShareClassId, name: impl Into<String>, total_shares: u64) -> Self {
        Self {
            id,
            name: name.into(),
            total_shares,
            reserved_shares: 0,
            reserved_issued: 0,
            available_shares: total_shares,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_reserve(mut self, reserved: u64, issued: u64) -> Self {
        self.reserved_shares = reserved;
        self.reserved_issued = issued;
        self.available_shares = self
            .total_shares
            .saturating_sub(self.net_reserved());
        self
    }

    pub fn net_reserved(&self) -> u64 {
        self.reserved_shares.saturating_sub(self.reserved_issued)
    }
}

/// Pool availability derived from first principles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBreakdown {
    pub sold: u64,
    pub pure_booked: u64,
    pub net_reserved: u64,
    pub available: u64,
}

impl PoolBreakdown {
    /// Conservation invariant: every share of the total supply is accounted
    /// for exactly once. Fails only when the pool is oversold.
    pub fn conserves(&self, total_shares: u64) -> bool {
        self.sold + self.available + self.pure_booked + self.net_reserved == total_shares
    }
}

/// Recompute pool availability from holdings and bookings.
///
/// - `sold` counts fully-owned holdings plus progressively-unlocked shares
///   of open bookings. A holding attributed to a still-open booking is
///   skipped; its shares are counted through the booking instead.
/// - `pure_booked` is the unpaid remainder of open bookings.
/// - `available` saturates at zero; an oversold pool shows up as a failed
///   [`PoolBreakdown::conserves`] check, not a negative number.
///
/// Pure function; the live availability check and the reconciliation sweep
/// both call it, so the two cannot diverge.
pub fn recompute_availability(
    pool: &SharePool,
    holdings: &[Holding],
    bookings: &[Booking],
) -> PoolBreakdown {
    let open_bookings: HashSet<&BookingId> = bookings
        .iter()
        .filter(|b| !b.status.is_terminal())
        .map(|b| &b.id)
        .collect();

    let mut sold: u64 = 0;
    for holding in holdings {
        match &holding.source {
            HoldingSource::Booking(id) if open_bookings.contains(id) => {}
            _ => sold += holding.quantity,
        }
    }

    let mut pure_booked: u64 = 0;
    for booking in bookings {
        if !booking.status.is_terminal() {
            sold += booking.shares_owned;
        }
        if booking.status.reserves_pool_shares() {
            pure_booked += booking.unpaid_quantity();
        }
    }

    let net_reserved = pool.net_reserved();
    let available = pool
        .total_shares
        .saturating_sub(sold)
        .saturating_sub(pure_booked)
        .saturating_sub(net_reserved);

    PoolBreakdown {
        sold,
        pure_booked,
        net_reserved,
        available,
    }
}
