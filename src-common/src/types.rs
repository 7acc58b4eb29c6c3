//! Shared types for the button layout and the state it reflects.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::MixerCommand;

/// An RGB color, serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Highlight used by scene buttons.
pub const SCENE_COLOR: Rgb = Rgb(255, 0, 0);
/// Highlight used by audio buttons.
pub const AUDIO_COLOR: Rgb = Rgb(128, 0, 128);
/// Highlight used by stream buttons.
pub const STREAM_COLOR: Rgb = Rgb(0, 0, 255);
/// Highlight used by update buttons driven by a shell predicate.
pub const COMMAND_COLOR: Rgb = Rgb(0, 160, 0);
/// Highlight used by workspace buttons.
pub const WORKSPACE_COLOR: Rgb = Rgb(255, 140, 0);

/// Semantic category of mutually-exclusive selectable state.
///
/// Each key holds at most one active value at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "key", content = "id", rename_all = "snake_case")]
pub enum StateKey {
    /// The active video composition
    SceneLayout,
    /// Live, or the reason the stream is blanked
    StreamMode,
    /// The audio channel currently routed to the output
    AudioChannel,
    /// Result of an update button's predicate, keyed by button name
    Command(String),
    /// Visibility of a window-manager workspace, keyed by workspace id
    Workspace(String),
}

impl StateKey {
    /// Whether this key is fed by the mixer status socket.
    pub fn is_mixer_state(&self) -> bool {
        matches!(
            self,
            StateKey::SceneLayout | StateKey::StreamMode | StateKey::AudioChannel
        )
    }

    /// Keys owned by the mixer status socket.
    pub fn mixer_keys() -> [StateKey; 3] {
        [
            StateKey::SceneLayout,
            StateKey::StreamMode,
            StateKey::AudioChannel,
        ]
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::SceneLayout => write!(f, "scene-layout"),
            StateKey::StreamMode => write!(f, "stream-mode"),
            StateKey::AudioChannel => write!(f, "audio-channel"),
            StateKey::Command(name) => write!(f, "command:{}", name),
            StateKey::Workspace(id) => write!(f, "workspace:{}", id),
        }
    }
}

/// Value asserted for an update button whose predicate succeeded.
pub const COMMAND_OK: &str = "ok";
/// Value asserted for a workspace that is currently visible.
pub const WORKSPACE_VISIBLE: &str = "visible";

/// The atomic unit of state written by any source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFact {
    pub key: StateKey,
    pub value: String,
    /// `false` clears whatever value is active under `key`
    pub asserted: bool,
}

impl StateFact {
    /// Mark `value` as the sole active value for `key`.
    pub fn assert(key: StateKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            asserted: true,
        }
    }

    /// Remove any active value for `key`.
    pub fn clear(key: StateKey) -> Self {
        Self {
            key,
            value: String::new(),
            asserted: false,
        }
    }
}

/// What piece of state a button represents.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binding {
    /// Purely a launcher; never highlighted
    #[default]
    None,
    /// A video composition: `mode` over `inputs` (primary input first)
    Scene { mode: String, inputs: Vec<String> },
    /// A stream state; `blank` states are entered with `set_stream_blank`
    Stream { state: String, blank: bool },
    /// An audio channel
    Audio { channel: String },
    /// An update button whose highlight follows a shell predicate's exit status
    Command { predicate: String },
    /// A window-manager workspace
    Workspace { id: String },
}

impl Binding {
    /// The state slot this binding reads, given the owning button's name.
    ///
    /// A button is selected when the snapshot holds exactly this value
    /// under this key.
    pub fn state_slot(&self, button_name: &str) -> Option<(StateKey, String)> {
        match self {
            Binding::None => None,
            Binding::Scene { .. } => Some((StateKey::SceneLayout, button_name.to_string())),
            Binding::Stream { state, .. } => Some((StateKey::StreamMode, state.clone())),
            Binding::Audio { channel } => Some((StateKey::AudioChannel, channel.clone())),
            Binding::Command { .. } => Some((
                StateKey::Command(button_name.to_string()),
                COMMAND_OK.to_string(),
            )),
            Binding::Workspace { id } => Some((
                StateKey::Workspace(id.clone()),
                WORKSPACE_VISIBLE.to_string(),
            )),
        }
    }

    /// Highlight color used when a button does not declare one.
    pub fn default_color(&self) -> Option<Rgb> {
        match self {
            Binding::None => None,
            Binding::Scene { .. } => Some(SCENE_COLOR),
            Binding::Stream { .. } => Some(STREAM_COLOR),
            Binding::Audio { .. } => Some(AUDIO_COLOR),
            Binding::Command { .. } => Some(COMMAND_COLOR),
            Binding::Workspace { .. } => Some(WORKSPACE_COLOR),
        }
    }

    /// The action a press performs when a button does not declare one.
    pub fn implied_action(&self) -> Action {
        match self {
            Binding::Scene { mode, inputs } => match inputs.as_slice() {
                [a, b, ..] => Action::Mixer {
                    command: MixerCommand::SetVideosAndComposite {
                        a: a.clone(),
                        b: b.clone(),
                        mode: mode.clone(),
                    },
                },
                _ => Action::None,
            },
            Binding::Stream { state, blank } => Action::Mixer {
                command: if *blank {
                    MixerCommand::SetStreamBlank {
                        reason: state.clone(),
                    }
                } else {
                    MixerCommand::SetStreamLive
                },
            },
            Binding::Audio { channel } => Action::Mixer {
                command: MixerCommand::SetAudio {
                    channel: channel.clone(),
                },
            },
            Binding::Workspace { id } => Action::Workspace { id: id.clone() },
            Binding::None | Binding::Command { .. } => Action::None,
        }
    }
}

/// What happens when a button is pressed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    #[default]
    None,
    /// Send a command line to the mixer
    Mixer { command: MixerCommand },
    /// Launch a local process without waiting for it
    Run { argv: Vec<String> },
    /// Switch the window manager to a workspace
    Workspace { id: String },
    /// Blank the panel, close the mixer connection and stop the daemon
    Exit,
}

/// Declarative description of one physical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSpec {
    /// Unique semantic name, e.g. `pc-full`
    pub name: String,
    /// Label text; `\n` separates lines
    #[serde(default)]
    pub label: String,
    /// Highlight color while selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default)]
    pub binding: Binding,
    /// Explicit action; falls back to the binding's implied action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl ButtonSpec {
    /// A button with the given name, label and binding.
    pub fn new(name: &str, label: &str, binding: Binding) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            color: None,
            binding,
            action: None,
        }
    }

    /// An unlabeled placeholder key.
    pub fn blank(name: &str) -> Self {
        Self::new(name, "", Binding::None)
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// The highlight color, explicit or implied by the binding.
    pub fn highlight(&self) -> Option<Rgb> {
        self.color.or_else(|| self.binding.default_color())
    }

    /// The action performed on press, explicit or implied by the binding.
    pub fn effective_action(&self) -> Action {
        match &self.action {
            Some(action) => action.clone(),
            None => self.binding.implied_action(),
        }
    }
}

fn scene(name: &str, label: &str, mode: &str) -> ButtonSpec {
    ButtonSpec::new(
        name,
        label,
        Binding::Scene {
            mode: mode.to_string(),
            inputs: vec!["slides".to_string(), "cam".to_string()],
        },
    )
}

fn stream(name: &str, label: &str, state: &str, blank: bool) -> ButtonSpec {
    ButtonSpec::new(
        name,
        label,
        Binding::Stream {
            state: state.to_string(),
            blank,
        },
    )
}

fn audio(name: &str, label: &str, channel: &str) -> ButtonSpec {
    ButtonSpec::new(
        name,
        label,
        Binding::Audio {
            channel: channel.to_string(),
        },
    )
}

/// The built-in 5x3 layout for a 15-key panel.
pub fn default_layout() -> Vec<ButtonSpec> {
    let mut cam_full = scene("cam-full", "CAM\nFULL", "fullscreen");
    cam_full.binding = Binding::Scene {
        mode: "fullscreen".to_string(),
        inputs: vec!["cam".to_string(), "slides".to_string()],
    };

    vec![
        scene("pc-full", "PC\nFULL", "fullscreen"),
        cam_full,
        scene("pip", "Picture\nin\nPicture", "picture_in_picture"),
        stream("stream-live", "STREAM\nLIVE", "live", false),
        ButtonSpec::blank("blank-1"),
        audio("pc-audio", "PC\nAUDIO", "slides"),
        audio("cam-audio", "CAM\nAUDIO", "cam"),
        scene("sbs-preview", "Side-by-\nside\npreview", "side_by_side_preview"),
        stream("stream-pause", "STREAM\nPAUSE", "pause", true),
        ButtonSpec::blank("blank-2"),
        ButtonSpec::new("pc-restart", "PC\nRESTART", Binding::None),
        ButtonSpec::new("cam-restart", "CAM\nRESTART", Binding::None),
        scene("sbs-equal", "Side-by-\nside\nequal", "side_by_side_equal"),
        stream("no-stream", "NO\nSTREAM", "nostream", true),
        ButtonSpec::new("exit", "EXIT", Binding::None).with_action(Action::Exit),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_layout_fills_fifteen_keys_with_unique_names() {
        let layout = default_layout();
        assert_eq!(layout.len(), 15);

        let mut names: Vec<_> = layout.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 15);
    }

    #[test]
    fn scene_binding_implies_composite_command() {
        let layout = default_layout();
        let pc_full = &layout[0];
        assert_eq!(
            pc_full.effective_action(),
            Action::Mixer {
                command: MixerCommand::SetVideosAndComposite {
                    a: "slides".into(),
                    b: "cam".into(),
                    mode: "fullscreen".into(),
                }
            }
        );
        assert_eq!(pc_full.highlight(), Some(SCENE_COLOR));
    }

    #[test]
    fn stream_bindings_pick_live_or_blank() {
        let live = stream("live", "", "live", false);
        let pause = stream("pause", "", "pause", true);
        assert_eq!(
            live.effective_action(),
            Action::Mixer {
                command: MixerCommand::SetStreamLive
            }
        );
        assert_eq!(
            pause.effective_action(),
            Action::Mixer {
                command: MixerCommand::SetStreamBlank {
                    reason: "pause".into()
                }
            }
        );
    }

    #[test]
    fn explicit_action_overrides_binding() {
        let button = audio("pc-audio", "PC", "slides").with_action(Action::Exit);
        assert_eq!(button.effective_action(), Action::Exit);
    }

    #[test]
    fn state_slots_follow_binding_kind() {
        assert_eq!(
            Binding::Command {
                predicate: "true".into()
            }
            .state_slot("vpn"),
            Some((StateKey::Command("vpn".into()), COMMAND_OK.into()))
        );
        assert_eq!(
            Binding::Workspace { id: "3".into() }.state_slot("ws3"),
            Some((StateKey::Workspace("3".into()), WORKSPACE_VISIBLE.into()))
        );
        assert_eq!(Binding::None.state_slot("x"), None);
    }

    #[test]
    fn button_spec_deserializes_from_json_with_defaults() {
        let spec: ButtonSpec = serde_json::from_str(
            r#"{"name": "ws1", "label": "WS 1", "binding": {"kind": "workspace", "id": "1"}}"#,
        )
        .unwrap();
        assert_eq!(spec.action, None);
        assert_eq!(spec.effective_action(), Action::Workspace { id: "1".into() });
        assert_eq!(spec.highlight(), Some(WORKSPACE_COLOR));
    }
}
