//! Session and access control for the Rhyme Rivals battle client.
//!
//! SYSTEM CONTEXT
//! ==============
//! `state::session::SessionStore` owns identity (anonymous, guest, or signed
//! in) and mirrors it to durable storage. `guard` and `routes` decide what a
//! navigation shows for the current identity. `net` talks to the backend and
//! refuses account-only actions for guests before any request is built.

pub mod config;
pub mod error;
pub mod guard;
pub mod net;
pub mod routes;
pub mod state;
