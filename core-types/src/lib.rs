// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared identifiers, money type, status enums, and config for the share accounting system.

pub mod config;
pub mod ids;
pub mod money;
pub mod retry;
pub mod status;
