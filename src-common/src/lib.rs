//! Shared types for the voctodeck control panel.
//!
//! This crate holds everything that is independent of I/O: the declarative
//! button layout, the semantic state keys the daemon tracks, and the
//! line-oriented mixer protocol.

pub mod protocol;
pub mod types;

pub use types::*;
