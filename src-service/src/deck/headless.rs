//! In-memory panel.
//!
//! Used for dry runs without hardware and as the stand-in device in tests.
//! The paired [`HeadlessHandle`] injects key presses and inspects what was
//! drawn.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::backend::{DeckBackend, DeviceError, DeviceInfo, KeyEvent, KeyImage};

struct HeadlessState {
    images: Vec<KeyImage>,
    draws: Vec<usize>,
    brightness: u8,
    closed: bool,
    fail: bool,
}

fn lock(state: &Mutex<HeadlessState>) -> MutexGuard<'_, HeadlessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Headless panel backend
pub struct HeadlessDeck {
    info: DeviceInfo,
    state: Arc<Mutex<HeadlessState>>,
    events: Receiver<KeyEvent>,
}

/// Test-side view of a [`HeadlessDeck`].
#[derive(Clone)]
pub struct HeadlessHandle {
    state: Arc<Mutex<HeadlessState>>,
    events: Sender<KeyEvent>,
}

/// Create a headless panel with `key_count` keys and its control handle.
pub fn headless(key_count: usize) -> (HeadlessDeck, HeadlessHandle) {
    let state = Arc::new(Mutex::new(HeadlessState {
        images: vec![KeyImage::Blank; key_count],
        draws: Vec::new(),
        brightness: 0,
        closed: false,
        fail: false,
    }));
    let (tx, rx) = mpsc::channel();

    let deck = HeadlessDeck {
        info: DeviceInfo {
            name: "headless".to_string(),
            serial: "headless-0".to_string(),
            key_count,
            key_size: (72, 72),
        },
        state: Arc::clone(&state),
        events: rx,
    };
    let handle = HeadlessHandle { state, events: tx };
    (deck, handle)
}

impl HeadlessDeck {
    fn check(&self) -> Result<MutexGuard<'_, HeadlessState>, DeviceError> {
        let state = lock(&self.state);
        if state.fail {
            return Err(DeviceError::Io("headless panel unplugged".to_string()));
        }
        Ok(state)
    }
}

impl DeckBackend for HeadlessDeck {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        let mut state = self.check()?;
        state.images.iter_mut().for_each(|img| *img = KeyImage::Blank);
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<(), DeviceError> {
        self.check()?.brightness = percent;
        Ok(())
    }

    fn set_key_image(&mut self, index: usize, image: &KeyImage) -> Result<(), DeviceError> {
        let count = self.info.key_count;
        let mut state = self.check()?;
        let slot = state
            .images
            .get_mut(index)
            .ok_or(DeviceError::KeyOutOfRange { index, count })?;
        *slot = image.clone();
        state.draws.push(index);
        debug!("[Headless] key {} <- {:?}", index, summarize(image));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check().map(|_| ())
    }

    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<KeyEvent>, DeviceError> {
        drop(self.check()?);
        match self.events.recv_timeout(timeout) {
            Ok(first) => {
                let mut events = vec![first];
                events.extend(self.events.try_iter());
                Ok(events)
            }
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody can press keys any more; keep the caller's pacing.
                std::thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

fn summarize(image: &KeyImage) -> String {
    match image {
        KeyImage::Blank => "blank".to_string(),
        KeyImage::Face(face) => format!(
            "{:?}{}",
            face.label,
            if face.highlight.is_some() { " (selected)" } else { "" }
        ),
        KeyImage::Frame(frame) => format!("frame {}x{}", frame.width(), frame.height()),
    }
}

#[allow(dead_code)]
impl HeadlessHandle {
    /// Simulate a full press: key-down followed by key-up.
    pub fn press(&self, index: usize) {
        let _ = self.events.send(KeyEvent {
            index,
            pressed: true,
        });
        let _ = self.events.send(KeyEvent {
            index,
            pressed: false,
        });
    }

    /// What key `index` currently shows.
    pub fn image(&self, index: usize) -> Option<KeyImage> {
        lock(&self.state).images.get(index).cloned()
    }

    /// Keys that are not blank.
    pub fn active_images(&self) -> usize {
        lock(&self.state)
            .images
            .iter()
            .filter(|img| !img.is_blank())
            .count()
    }

    /// Every key index drawn so far, in order.
    pub fn draws(&self) -> Vec<usize> {
        lock(&self.state).draws.clone()
    }

    pub fn brightness(&self) -> u8 {
        lock(&self.state).brightness
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Make every further device call fail, as if the panel was unplugged.
    pub fn unplug(&self) {
        lock(&self.state).fail = true;
    }
}
