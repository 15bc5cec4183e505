//! Concrete exchange collaborators: signed REST access for account data and
//! destructive trade actions

pub mod rest;

pub use rest::*;
