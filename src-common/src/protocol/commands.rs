//! Outbound mixer commands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// A command sent from the panel to the mixer.
///
/// Serialized as its wire form, e.g. `"set_audio cam"`, so layouts can
/// spell commands the way the mixer does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MixerCommand {
    // === Status Queries ===
    GetCompositeModeAndVideoStatus,
    GetStreamStatus,
    GetAudio,

    // === Control ===
    /// Show input `a` and `b` composited with `mode`
    SetVideosAndComposite { a: String, b: String, mode: String },
    /// Route a single audio channel to the output
    SetAudio { channel: String },
    /// Blank the outgoing stream for `reason`
    SetStreamBlank { reason: String },
    SetStreamLive,
}

impl MixerCommand {
    /// Queries sent on every (re)connect to learn the current mixer state.
    pub fn status_queries() -> [MixerCommand; 3] {
        [
            MixerCommand::GetCompositeModeAndVideoStatus,
            MixerCommand::GetStreamStatus,
            MixerCommand::GetAudio,
        ]
    }

    /// The wire line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }

    /// Check that every argument is a single non-empty ASCII token.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let args: Vec<&str> = match self {
            MixerCommand::SetVideosAndComposite { a, b, mode } => {
                vec![a.as_str(), b.as_str(), mode.as_str()]
            }
            MixerCommand::SetAudio { channel } => vec![channel.as_str()],
            MixerCommand::SetStreamBlank { reason } => vec![reason.as_str()],
            _ => Vec::new(),
        };
        for arg in args {
            if arg.is_empty() || !arg.is_ascii() || arg.chars().any(char::is_whitespace) {
                return Err(ProtocolError::InvalidCommand(self.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for MixerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerCommand::GetCompositeModeAndVideoStatus => {
                write!(f, "get_composite_mode_and_video_status")
            }
            MixerCommand::GetStreamStatus => write!(f, "get_stream_status"),
            MixerCommand::GetAudio => write!(f, "get_audio"),
            MixerCommand::SetVideosAndComposite { a, b, mode } => {
                write!(f, "set_videos_and_composite {} {} {}", a, b, mode)
            }
            MixerCommand::SetAudio { channel } => write!(f, "set_audio {}", channel),
            MixerCommand::SetStreamBlank { reason } => write!(f, "set_stream_blank {}", reason),
            MixerCommand::SetStreamLive => write!(f, "set_stream_live"),
        }
    }
}

impl FromStr for MixerCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let invalid = || ProtocolError::InvalidCommand(s.to_string());

        let command = match tokens.as_slice() {
            ["get_composite_mode_and_video_status"] => {
                MixerCommand::GetCompositeModeAndVideoStatus
            }
            ["get_stream_status"] => MixerCommand::GetStreamStatus,
            ["get_audio"] => MixerCommand::GetAudio,
            ["set_videos_and_composite", a, b, mode] => MixerCommand::SetVideosAndComposite {
                a: a.to_string(),
                b: b.to_string(),
                mode: mode.to_string(),
            },
            ["set_audio", channel] => MixerCommand::SetAudio {
                channel: channel.to_string(),
            },
            ["set_stream_blank", reason] => MixerCommand::SetStreamBlank {
                reason: reason.to_string(),
            },
            ["set_stream_live"] => MixerCommand::SetStreamLive,
            _ => return Err(invalid()),
        };
        command.validate()?;
        Ok(command)
    }
}

impl TryFrom<String> for MixerCommand {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MixerCommand> for String {
    fn from(command: MixerCommand) -> Self {
        command.to_string()
    }
}
