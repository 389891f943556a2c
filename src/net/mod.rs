//! Networking modules for the battle backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` issues REST calls, `transport` owns header and status rules,
//! `credential` models the stored token, and `types` defines the wire schema.

pub mod api;
pub mod credential;
pub mod transport;
pub mod types;
