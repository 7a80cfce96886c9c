//! This module contains utilities for testing code built on the message exchange engine. They
//!  are used for testing the engine itself, but they are also exported for application testing,
//!  so they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod message;
pub mod timer;
