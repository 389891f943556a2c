//! Client-side state modules.
//!
//! DESIGN
//! ======
//! `session` owns identity and its mutations; `storage` is the durable slot
//! behind it. Nothing outside `session` reads `storage` directly.

pub mod session;
pub mod storage;
