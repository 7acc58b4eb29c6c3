//! Per-panel device session.
//!
//! Each opened panel is owned by exactly one session thread. Draw requests
//! arrive over a channel and are coalesced per key; key transitions are
//! forwarded to the action dispatcher tagged with the panel id.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{DeckBackend, DeviceError, DeviceInfo, KeyEvent, KeyImage};

/// How long one `poll_events` call may block.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Request sent to a session thread.
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    Draw { index: usize, image: KeyImage },
}

/// A key transition on a specific panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeckKeyEvent {
    pub deck: usize,
    pub key: KeyEvent,
}

/// Cloneable sender side of a running session.
#[derive(Debug, Clone)]
pub struct DeckHandle {
    pub id: usize,
    pub info: DeviceInfo,
    tx: UnboundedSender<DeviceCommand>,
    cancel: CancellationToken,
}

impl DeckHandle {
    /// Queue an image for a key. Dropped silently once the session ended.
    pub fn draw(&self, index: usize, image: KeyImage) {
        let _ = self.tx.send(DeviceCommand::Draw { index, image });
    }

    /// Token cancelled when this session ends for any reason.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    #[allow(dead_code)]
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// A running session and its thread.
pub struct DeckSession {
    pub handle: DeckHandle,
    thread: JoinHandle<()>,
}

impl DeckSession {
    /// Wait for the session thread to finish its teardown.
    pub async fn join(self) {
        let id = self.handle.id;
        let result = tokio::task::spawn_blocking(move || self.thread.join()).await;
        if !matches!(result, Ok(Ok(()))) {
            warn!("[Deck {}] Session thread panicked", id);
        }
    }
}

/// Reset the panel, apply brightness and start its session thread.
///
/// The session ends when `parent` is cancelled or on the first device
/// error. Either way every key is blanked (best effort) and the device is
/// released before the thread exits.
pub fn spawn_session(
    id: usize,
    mut backend: Box<dyn DeckBackend>,
    brightness: u8,
    events: UnboundedSender<DeckKeyEvent>,
    parent: &CancellationToken,
) -> Result<DeckSession, DeviceError> {
    let info = backend.info();
    backend.reset()?;
    backend.set_brightness(brightness)?;
    info!(
        "[Deck {}] {} ({}) ready: {} keys, brightness {}%",
        id, info.name, info.serial, info.key_count, brightness
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = parent.child_token();
    let handle = DeckHandle {
        id,
        info: info.clone(),
        tx,
        cancel: cancel.clone(),
    };

    let thread = thread::Builder::new()
        .name(format!("deck-{}", id))
        .spawn(move || {
            let result = run_session(id, backend.as_mut(), rx, &events, &cancel);
            if let Err(e) = &result {
                warn!("[Deck {}] Device failed: {}", id, e);
            }
            cancel.cancel();
            teardown(id, backend.as_mut(), info.key_count, result.is_ok());
        })
        .map_err(|e| DeviceError::Io(e.to_string()))?;

    Ok(DeckSession { handle, thread })
}

fn run_session(
    id: usize,
    backend: &mut dyn DeckBackend,
    mut rx: UnboundedReceiver<DeviceCommand>,
    events: &UnboundedSender<DeckKeyEvent>,
    cancel: &CancellationToken,
) -> Result<(), DeviceError> {
    let mut pending: BTreeMap<usize, KeyImage> = BTreeMap::new();

    while !cancel.is_cancelled() {
        loop {
            match rx.try_recv() {
                Ok(DeviceCommand::Draw { index, image }) => {
                    pending.insert(index, image);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("[Deck {}] All draw handles dropped", id);
                    return Ok(());
                }
            }
        }

        if !pending.is_empty() {
            for (index, image) in std::mem::take(&mut pending) {
                backend.set_key_image(index, &image)?;
            }
            backend.flush()?;
        }

        for key in backend.poll_events(POLL_INTERVAL)? {
            debug!(
                "[Deck {}] key {} {}",
                id,
                key.index,
                if key.pressed { "down" } else { "up" }
            );
            let _ = events.send(DeckKeyEvent { deck: id, key });
        }
    }
    Ok(())
}

fn teardown(id: usize, backend: &mut dyn DeckBackend, key_count: usize, healthy: bool) {
    if healthy {
        let blanked = (0..key_count)
            .try_for_each(|index| backend.set_key_image(index, &KeyImage::Blank))
            .and_then(|_| backend.flush());
        if let Err(e) = blanked {
            warn!("[Deck {}] Failed to blank keys: {}", id, e);
        }
    }
    if let Err(e) = backend.close() {
        warn!("[Deck {}] Failed to release device: {}", id, e);
    }
    info!("[Deck {}] Session closed", id);
}
