//! Mapping of mixer status lines onto state facts.

use std::sync::Arc;

use tracing::{debug, warn};
use voctodeck_common::protocol::StatusLine;
use voctodeck_common::{StateFact, StateKey};

use crate::buttons::ButtonModel;

/// Turns raw status lines into the facts they imply.
#[derive(Debug, Clone)]
pub struct StatusInterpreter {
    model: Arc<ButtonModel>,
}

impl StatusInterpreter {
    pub fn new(model: Arc<ButtonModel>) -> Self {
        Self { model }
    }

    /// Parse one raw line. Malformed lines yield no facts.
    pub fn interpret_line(&self, line: &str) -> Vec<StateFact> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        match StatusLine::parse(line) {
            Ok(status) => self.interpret(&status),
            Err(e) => {
                warn!("[Mixer] Dropping malformed line: {}", e);
                Vec::new()
            }
        }
    }

    pub fn interpret(&self, status: &StatusLine) -> Vec<StateFact> {
        match status {
            StatusLine::CompositeModeAndVideoStatus { mode, inputs } => {
                match self.model.scene_for(mode, inputs) {
                    Some(scene) => vec![StateFact::assert(StateKey::SceneLayout, scene)],
                    None => vec![StateFact::clear(StateKey::SceneLayout)],
                }
            }
            StatusLine::StreamStatus { state, .. } => {
                vec![StateFact::assert(StateKey::StreamMode, state.as_str())]
            }
            StatusLine::AudioStatus { channels } => {
                // Each active channel is asserted in payload order, so with
                // one slot per key the last active channel wins.
                match channels.iter().rev().find(|(_, active)| *active) {
                    Some((channel, _)) => {
                        vec![StateFact::assert(StateKey::AudioChannel, channel.as_str())]
                    }
                    None => vec![StateFact::clear(StateKey::AudioChannel)],
                }
            }
            StatusLine::Unknown { prefix } => {
                debug!("[Mixer] Ignoring status line `{}`", prefix);
                Vec::new()
            }
        }
    }
}
