//! Mixer status-socket adapter.

mod connection;
mod parser;

pub use connection::{mixer_channel, MixerAdapter, MixerError, MixerHandle};
pub use parser::StatusInterpreter;
