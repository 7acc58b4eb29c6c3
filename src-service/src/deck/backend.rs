//! Platform-agnostic panel backend trait.

use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use voctodeck_common::Rgb;

/// Label and highlight of a state-driven key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFace {
    pub label: String,
    /// Background fill while selected; `None` draws on black
    pub highlight: Option<Rgb>,
}

/// What a single key should show.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyImage {
    /// Dark key
    Blank,
    /// Rendered by the backend from a label and highlight
    Face(KeyFace),
    /// Pre-composited pixels already sized for the key
    Frame(RgbImage),
}

impl KeyImage {
    pub fn is_blank(&self) -> bool {
        matches!(self, KeyImage::Blank)
    }
}

/// A key changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub index: usize,
    /// `true` on key-down, `false` on key-up
    pub pressed: bool,
}

/// Static description of an opened panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub key_count: usize,
    /// Key bitmap size in pixels (width, height)
    pub key_size: (u32, u32),
}

/// Panel I/O errors. Any of these ends the session of the affected panel.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no panel found")]
    NotFound,

    #[error("key {index} out of range (panel has {count} keys)")]
    KeyOutOfRange { index: usize, count: usize },

    #[error("device I/O failed: {0}")]
    Io(String),

    #[error("{0} backend was not compiled into this build")]
    Unsupported(&'static str),
}

/// Platform-agnostic panel interface.
///
/// Implementations are blocking and are driven from a dedicated session
/// thread which is the only owner of the handle.
pub trait DeckBackend: Send {
    fn info(&self) -> DeviceInfo;

    /// Return the panel to a known blank state.
    fn reset(&mut self) -> Result<(), DeviceError>;

    fn set_brightness(&mut self, percent: u8) -> Result<(), DeviceError>;

    /// Queue an image for one key. Takes effect on the next `flush`.
    fn set_key_image(&mut self, index: usize, image: &KeyImage) -> Result<(), DeviceError>;

    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Wait up to `timeout` for key transitions.
    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<KeyEvent>, DeviceError>;

    /// Release the device handle.
    fn close(&mut self) -> Result<(), DeviceError>;
}
