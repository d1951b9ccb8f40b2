// Copyright (c) James Kassemi, SC, US. All rights reserved.

use serde::{Deserialize, Serialize};

/// Lifecycle of an installment booking.
///
/// Payments are accepted only in the three non-terminal states; a terminal
/// booking never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Active,
    PartiallyPaid,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    pub fn accepts_payment(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the booking still holds a claim on the pool's unsold shares.
    pub fn reserves_pool_shares(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Active | BookingStatus::PartiallyPaid
        )
    }
}

/// Lifecycle of a share transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Rejected | TransferStatus::Completed)
    }
}
