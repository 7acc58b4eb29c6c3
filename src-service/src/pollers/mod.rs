//! Fixed-interval pollers feeding the state store.
//!
//! - Command poller: update buttons driven by shell predicates
//! - Workspace poller: window-manager workspace visibility

mod command;
mod workspace;

pub use command::CommandPoller;
pub use workspace::WorkspacePoller;
