//! Key panel devices.
//!
//! This module provides the panel backends:
//! - Stream Deck: Elgato hardware over hidapi (`streamdeck` feature)
//! - Headless: in-memory panel for dry runs and tests

mod backend;
pub mod headless;
mod session;

#[cfg(feature = "streamdeck")]
mod streamdeck;

pub use backend::{DeckBackend, DeviceError, DeviceInfo, KeyEvent, KeyFace, KeyImage};
pub use session::{spawn_session, DeckHandle, DeckKeyEvent, DeckSession};

use tracing::info;

use crate::config::{BackendKind, DeckConfig};

/// Key count of the headless panel; matches a 15-key Stream Deck.
pub const HEADLESS_KEYS: usize = 15;

/// Open every panel the configuration asks for.
pub fn open_backends(
    config: &DeckConfig,
    layout_len: usize,
) -> Result<Vec<Box<dyn DeckBackend>>, DeviceError> {
    match config.backend {
        BackendKind::Headless => {
            let (deck, _handle) = headless::headless(HEADLESS_KEYS.max(layout_len));
            info!("[Deck] Using headless panel");
            Ok(vec![Box::new(deck)])
        }

        #[cfg(feature = "streamdeck")]
        BackendKind::Streamdeck => {
            let decks = streamdeck::open_all(config.serial.as_deref(), config.font.as_deref())?;
            Ok(decks
                .into_iter()
                .map(|d| Box::new(d) as Box<dyn DeckBackend>)
                .collect())
        }

        #[cfg(not(feature = "streamdeck"))]
        BackendKind::Streamdeck => Err(DeviceError::Unsupported("streamdeck")),
    }
}

/// Describe connected panels, one line each.
pub fn list_devices() -> Result<Vec<String>, DeviceError> {
    #[cfg(feature = "streamdeck")]
    {
        Ok(streamdeck::enumerate()?
            .into_iter()
            .map(|(kind, serial)| format!("{:?}\t{}", kind, serial))
            .collect())
    }

    #[cfg(not(feature = "streamdeck"))]
    {
        Err(DeviceError::Unsupported("streamdeck"))
    }
}
