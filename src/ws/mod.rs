//! WebSocket transport for exchange user-channel order events
//!
//! This module provides:
//! - A WebSocket client with subscribe/unsubscribe commands, heartbeat and
//!   auto-reconnection
//! - Event models for the user channel, whose events replay and update whole
//!   order records

pub mod client;
pub mod events;

pub use client::*;
pub use events::*;
