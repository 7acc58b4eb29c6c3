//! Inbound mixer status lines.

use serde_json::{Map, Value};

use super::ProtocolError;

const COMPOSITE: &str = "composite_mode_and_video_status";
const STREAM: &str = "stream_status";
const AUDIO: &str = "audio_status";

/// A status line reported by the mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// `composite_mode_and_video_status <mode> <inputs...>`
    CompositeModeAndVideoStatus { mode: String, inputs: Vec<String> },

    /// `stream_status [blank] <state>`; `state` is `live` or a blank reason
    StreamStatus { blank: bool, state: String },

    /// `audio_status {json}`; each channel with whether it is active, in
    /// payload order
    AudioStatus { channels: Vec<(String, bool)> },

    /// Any line with an unrecognized prefix
    Unknown { prefix: String },
}

impl StatusLine {
    /// Parse a single line (without its trailing newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let prefix = tokens.next().unwrap_or_default();

        match prefix {
            COMPOSITE => {
                let mode = tokens.next().ok_or_else(|| ProtocolError::MissingField {
                    prefix: COMPOSITE,
                    what: "a composite mode",
                    line: line.to_string(),
                })?;
                Ok(StatusLine::CompositeModeAndVideoStatus {
                    mode: mode.to_string(),
                    inputs: tokens.map(str::to_string).collect(),
                })
            }
            STREAM => {
                let args: Vec<&str> = tokens.collect();
                let state = args.last().ok_or_else(|| ProtocolError::MissingField {
                    prefix: STREAM,
                    what: "a stream state",
                    line: line.to_string(),
                })?;
                Ok(StatusLine::StreamStatus {
                    blank: args.len() > 1 && args[0] == "blank",
                    state: state.to_string(),
                })
            }
            AUDIO => parse_audio(line),
            other => Ok(StatusLine::Unknown {
                prefix: other.to_string(),
            }),
        }
    }
}

/// The JSON object starts at the first `{`; anything between the prefix
/// and the object (such as an `AUDIO_STATUS:` tag) is ignored.
fn parse_audio(line: &str) -> Result<StatusLine, ProtocolError> {
    let start = line.find('{').ok_or_else(|| ProtocolError::MissingField {
        prefix: AUDIO,
        what: "a JSON object",
        line: line.to_string(),
    })?;

    let raw: Map<String, Value> =
        serde_json::from_str(&line[start..]).map_err(|e| ProtocolError::InvalidPayload {
            prefix: AUDIO,
            message: e.to_string(),
        })?;

    let mut channels = Vec::with_capacity(raw.len());
    for (channel, value) in raw {
        let active = match &value {
            Value::Number(n) => n.as_f64() == Some(1.0),
            Value::Bool(b) => *b,
            other => {
                return Err(ProtocolError::InvalidPayload {
                    prefix: AUDIO,
                    message: format!("channel {:?} has non-numeric level {}", channel, other),
                })
            }
        };
        channels.push((channel, active));
    }

    Ok(StatusLine::AudioStatus { channels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_composite_status() {
        assert_eq!(
            StatusLine::parse("composite_mode_and_video_status fullscreen slides cam").unwrap(),
            StatusLine::CompositeModeAndVideoStatus {
                mode: "fullscreen".into(),
                inputs: vec!["slides".into(), "cam".into()],
            }
        );
    }

    #[test]
    fn composite_without_mode_is_malformed() {
        assert!(matches!(
            StatusLine::parse("composite_mode_and_video_status"),
            Err(ProtocolError::MissingField { .. })
        ));
    }

    #[test]
    fn parses_live_and_blank_stream_status() {
        assert_eq!(
            StatusLine::parse("stream_status live").unwrap(),
            StatusLine::StreamStatus {
                blank: false,
                state: "live".into()
            }
        );
        assert_eq!(
            StatusLine::parse("stream_status blank pause").unwrap(),
            StatusLine::StreamStatus {
                blank: true,
                state: "pause".into()
            }
        );
        assert!(StatusLine::parse("stream_status").is_err());
    }

    #[test]
    fn parses_tagged_audio_status() {
        let line = r#"audio_status AUDIO_STATUS: {"slides": 1, "cam": 0}"#;
        assert_eq!(
            StatusLine::parse(line).unwrap(),
            StatusLine::AudioStatus {
                channels: vec![("slides".to_string(), true), ("cam".to_string(), false)]
            }
        );
    }

    #[test]
    fn audio_channels_keep_payload_order() {
        let line = r#"audio_status {"zoom": 1, "cam": 0, "mic": 1}"#;
        let StatusLine::AudioStatus { channels } = StatusLine::parse(line).unwrap() else {
            panic!("not an audio status");
        };
        let names: Vec<&str> = channels.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zoom", "cam", "mic"]);
    }

    #[test]
    fn audio_status_with_bad_json_is_malformed() {
        assert!(matches!(
            StatusLine::parse("audio_status {slides: 1"),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        assert!(matches!(
            StatusLine::parse("audio_status nothing here"),
            Err(ProtocolError::MissingField { .. })
        ));
        assert!(matches!(
            StatusLine::parse(r#"audio_status {"slides": "loud"}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn unknown_prefixes_pass_through() {
        assert_eq!(
            StatusLine::parse("video_status slides cam").unwrap(),
            StatusLine::Unknown {
                prefix: "video_status".into()
            }
        );
        assert_eq!(
            StatusLine::parse("").unwrap(),
            StatusLine::Unknown {
                prefix: String::new()
            }
        );
    }
}
