//! Core module containing the aggregation and valuation engine
//!
//! This module provides the core building blocks:
//! - **Order store**: keyed cache of order records fed by the user channel
//! - **Balance store**: per-currency balance table replaced per snapshot
//! - **Valuation**: pure potential-account-value computation
//! - **Coordinator**: the refresh-cycle state machine tying them together
//! - **Trait definitions**: contracts for the external collaborators

pub mod balances;
pub mod coordinator;
pub mod orders;
pub mod traits;
pub mod valuation;
