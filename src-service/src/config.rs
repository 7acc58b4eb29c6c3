//! Configuration: command-line flags layered over an optional TOML file.
//!
//! # Config File Locations
//!
//! The first file found wins:
//! 1. `--config PATH` (or `VOCTODECK_CONFIG`), which must exist
//! 2. `./voctodeck.toml`
//! 3. `~/.config/voctodeck/config.toml`
//! 4. `/etc/voctodeck/config.toml`
//!
//! Without any file the compiled defaults drive the built-in 15-key layout.
//!
//! # Example Config
//!
//! ```toml
//! [mixer]
//! address = "mixer.local:9999"
//!
//! [deck]
//! brightness = 40
//! font = "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf"
//!
//! [[buttons]]
//! name = "vpn"
//! label = "VPN"
//! binding = { kind = "command", predicate = "ip link show wg0" }
//! action = { kind = "run", argv = ["wg-quick", "up", "wg0"] }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use voctodeck_common::protocol::DEFAULT_MIXER_PORT;
use voctodeck_common::{default_layout, Action, Binding, ButtonSpec};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {path} does not exist")]
    NotFound { path: PathBuf },

    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line options for the daemon.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "voctodeck")]
#[command(version)]
#[command(about = "Bind an illuminated key panel to a live video mixer", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "VOCTODECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mixer control endpoint (host:port)
    #[arg(long, env = "VOCTODECK_MIXER")]
    pub mixer: Option<String>,

    /// Accept raw RGB video frames on this address and show them on the video key
    #[arg(long, env = "VOCTODECK_VIDEO_LISTEN")]
    pub video_listen: Option<String>,

    /// Run without hardware (key images are only logged)
    #[arg(long)]
    pub headless: bool,

    /// Panel brightness in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub brightness: Option<u8>,

    /// Increase log verbosity
    #[arg(short, long)]
    pub verbose: bool,

    /// List attached panels and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub mixer: MixerConfig,
    pub deck: DeckConfig,
    pub video: VideoConfig,
    pub poll: PollConfig,
    pub buttons: Vec<ButtonSpec>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mixer: MixerConfig::default(),
            deck: DeckConfig::default(),
            video: VideoConfig::default(),
            poll: PollConfig::default(),
            buttons: default_layout(),
        }
    }
}

/// Mixer control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// `host:port` of the mixer control endpoint
    pub address: String,
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubles after every failed attempt
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            address: format!("localhost:{}", DEFAULT_MIXER_PORT),
            connect_timeout_ms: 2000,
            backoff_initial_ms: 250,
            backoff_max_ms: 10_000,
        }
    }
}

impl MixerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Which device backend drives the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Elgato Stream Deck over hidapi
    Streamdeck,
    /// In-memory panel for testing and dry runs
    Headless,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "streamdeck") {
            BackendKind::Streamdeck
        } else {
            BackendKind::Headless
        }
    }
}

/// Physical panel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub backend: BackendKind,
    /// Initial brightness in percent
    pub brightness: u8,
    /// TrueType font used for key labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    /// Only open the panel with this serial number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            brightness: 30,
            font: None,
            serial: None,
        }
    }
}

/// Largest accepted video frame side, in pixels.
pub const MAX_FRAME_SIDE: u32 = 2048;

/// Raw video preview on one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    /// Address the frame source connects to
    pub listen: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Key index the frames are drawn on
    pub key: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9998".to_string(),
            width: 72,
            height: 72,
            key: 4,
        }
    }
}

impl VideoConfig {
    /// Bytes in one raw RGB frame.
    ///
    /// Saturates instead of overflowing; `validate` keeps real sizes small.
    pub fn frame_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(3)
    }
}

/// Periodic pollers for update buttons and workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Upper bound on a single predicate or window-manager query
    pub command_timeout_ms: u64,
    /// Shell used to run update-button predicates
    pub shell: String,
    /// Command printing the workspace list as JSON
    pub workspace_query: Vec<String>,
    /// Command switching workspaces; `{id}` is replaced by the workspace id
    pub workspace_switch: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            command_timeout_ms: 1000,
            shell: "sh".to_string(),
            workspace_query: vec![
                "i3-msg".to_string(),
                "-t".to_string(),
                "get_workspaces".to_string(),
            ],
            workspace_switch: vec![
                "i3-msg".to_string(),
                "workspace".to_string(),
                "{id}".to_string(),
            ],
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl ServiceConfig {
    /// Load the config file (if any), then apply command-line overrides.
    ///
    /// Returns the config and the file it came from.
    pub fn load(cli: &Cli) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = discover_config_file(cli.config.as_deref())?;
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok((config, path))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents, path)
    }

    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Command-line flags (and their environment variables) win over the file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(address) = &cli.mixer {
            self.mixer.address = address.clone();
        }
        if let Some(listen) = &cli.video_listen {
            self.video.enabled = true;
            self.video.listen = listen.clone();
        }
        if cli.headless {
            self.deck.backend = BackendKind::Headless;
        }
        if let Some(brightness) = cli.brightness {
            self.deck.brightness = brightness;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.mixer.address.trim().is_empty() {
            return invalid("mixer.address cannot be empty".into());
        }
        if self.mixer.backoff_initial_ms == 0
            || self.mixer.backoff_max_ms < self.mixer.backoff_initial_ms
        {
            return invalid("mixer backoff must satisfy 0 < initial <= max".into());
        }
        if self.deck.brightness > 100 {
            return invalid(format!(
                "deck.brightness must be 0-100, got {}",
                self.deck.brightness
            ));
        }
        if self.poll.interval_ms == 0 || self.poll.command_timeout_ms == 0 {
            return invalid("poll interval and timeout must be positive".into());
        }
        if self.poll.workspace_query.is_empty() || self.poll.workspace_switch.is_empty() {
            return invalid("poll.workspace_query and poll.workspace_switch need a program".into());
        }
        if self.video.enabled {
            if self.video.width == 0 || self.video.height == 0 {
                return invalid("video frame size must be non-zero".into());
            }
            if self.video.width > MAX_FRAME_SIDE || self.video.height > MAX_FRAME_SIDE {
                return invalid(format!(
                    "video frame {}x{} exceeds {}x{}",
                    self.video.width, self.video.height, MAX_FRAME_SIDE, MAX_FRAME_SIDE
                ));
            }
            if self.video.key >= self.buttons.len() {
                return invalid(format!(
                    "video.key {} is outside the {}-button layout",
                    self.video.key,
                    self.buttons.len()
                ));
            }
        }

        let mut names = HashSet::new();
        for button in &self.buttons {
            if button.name.is_empty() {
                return invalid("every button needs a name".into());
            }
            if !names.insert(button.name.as_str()) {
                return invalid(format!("duplicate button name {:?}", button.name));
            }
            validate_button(button).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

fn validate_button(button: &ButtonSpec) -> Result<(), String> {
    match &button.binding {
        Binding::Scene { mode, inputs } if mode.is_empty() || inputs.is_empty() => {
            return Err(format!(
                "scene button {:?} needs a mode and at least one input",
                button.name
            ));
        }
        Binding::Command { predicate } if predicate.trim().is_empty() => {
            return Err(format!("update button {:?} has an empty predicate", button.name));
        }
        _ => {}
    }

    match button.effective_action() {
        Action::Mixer { command } => command
            .validate()
            .map_err(|e| format!("button {:?}: {}", button.name, e)),
        Action::Run { argv } if argv.is_empty() => {
            Err(format!("button {:?} has an empty run argv", button.name))
        }
        _ => Ok(()),
    }
}

/// Find the config file to load, honoring an explicit override.
pub fn discover_config_file(cli_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    let mut candidates = vec![PathBuf::from("voctodeck.toml")];
    if let Some(dirs) = directories::BaseDirs::new() {
        candidates.push(dirs.config_dir().join("voctodeck/config.toml"));
    }
    candidates.push(PathBuf::from("/etc/voctodeck/config.toml"));

    Ok(candidates.into_iter().find(|p| p.exists()))
}
