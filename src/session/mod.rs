//! IMAP session module.
//!
//! This module contains the resilient IMAP session and its transport
//! plumbing.

pub mod lock;
pub mod session;
pub mod stream;

pub use session::*;
pub use stream::SessionStream;
