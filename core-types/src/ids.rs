// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Opaque identifiers shared across the accounting crates.
//!
//! The upstream platform keys every record by an opaque string id, so these
//! are thin string newtypes rather than numeric handles.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(ShareClassId);
string_id!(UserId);
string_id!(BookingId);
string_id!(HoldingId);
string_id!(TransferId);

/// Caller-supplied idempotency reference attached to every payment or
/// purchase mutation. Submitting the same reference twice must apply the
/// mutation once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaymentReference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
