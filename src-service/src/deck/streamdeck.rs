//! Elgato Stream Deck backend over hidapi.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ab_glyph::{FontVec, PxScale};
use elgato_streamdeck::info::Kind;
use elgato_streamdeck::{list_devices, new_hidapi, StreamDeck, StreamDeckInput};
use image::{DynamicImage, Rgb as Pixel, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use tracing::{info, warn};

use super::backend::{DeckBackend, DeviceError, DeviceInfo, KeyEvent, KeyFace, KeyImage};

/// Fonts tried when none is configured.
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
];

fn hid_error(e: impl std::fmt::Display) -> DeviceError {
    DeviceError::Io(e.to_string())
}

/// Connected (kind, serial) pairs.
pub fn enumerate() -> Result<Vec<(Kind, String)>, DeviceError> {
    let hid = new_hidapi().map_err(hid_error)?;
    Ok(list_devices(&hid))
}

/// Open every connected panel, or only the one matching `serial`.
pub fn open_all(
    serial: Option<&str>,
    font: Option<&Path>,
) -> Result<Vec<StreamDeckBackend>, DeviceError> {
    let hid = new_hidapi().map_err(hid_error)?;
    let font = load_font(font);

    let mut decks = Vec::new();
    for (kind, found) in list_devices(&hid) {
        if serial.is_some_and(|wanted| wanted != found) {
            continue;
        }
        match StreamDeck::connect(&hid, kind, &found) {
            Ok(device) => {
                info!("[Deck] Connected {:?} (serial {})", kind, found);
                decks.push(StreamDeckBackend::new(device, kind, found, font.clone()));
            }
            Err(e) => warn!("[Deck] Failed to connect {:?} ({}): {}", kind, found, e),
        }
    }

    if decks.is_empty() {
        return Err(DeviceError::NotFound);
    }
    Ok(decks)
}

fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                info!("[Deck] Using font {}", path.display());
                return Some(font);
            }
            Err(e) => warn!("[Deck] Invalid font {}: {}", path.display(), e),
        }
    }

    warn!("[Deck] No usable font found, keys will show colors only");
    None
}

pub struct StreamDeckBackend {
    device: StreamDeck,
    info: DeviceInfo,
    font: Option<FontVec>,
    pressed: Vec<bool>,
}

impl StreamDeckBackend {
    fn new(device: StreamDeck, kind: Kind, serial: String, font: Option<FontVec>) -> Self {
        let (w, h) = kind.key_image_format().size;
        let key_count = kind.key_count() as usize;
        Self {
            device,
            info: DeviceInfo {
                name: format!("{:?}", kind),
                serial,
                key_count,
                key_size: (w as u32, h as u32),
            },
            font,
            pressed: vec![false; key_count],
        }
    }

    fn render_face(&self, face: &KeyFace) -> RgbImage {
        let (w, h) = self.info.key_size;
        let fill = face.highlight.map(|c| Pixel([c.0, c.1, c.2])).unwrap_or(Pixel([0, 0, 0]));
        let mut img = RgbImage::from_pixel(w, h, fill);

        let Some(font) = &self.font else {
            return img;
        };

        let lines: Vec<&str> = face.label.lines().collect();
        if lines.is_empty() {
            return img;
        }
        let scale = PxScale::from((h as f32 * 0.2).max(10.0));
        let line_height = scale.y as i32 + 2;
        let total = line_height * lines.len() as i32;
        let mut y = (h as i32 - total) / 2;

        for line in lines {
            let (tw, _) = text_size(scale, font, line);
            let x = (w as i32 - tw as i32) / 2;
            draw_text_mut(&mut img, Pixel([255, 255, 255]), x, y, scale, font, line);
            y += line_height;
        }
        img
    }

    fn check_index(&self, index: usize) -> Result<u8, DeviceError> {
        if index >= self.info.key_count {
            return Err(DeviceError::KeyOutOfRange {
                index,
                count: self.info.key_count,
            });
        }
        Ok(index as u8)
    }
}

impl DeckBackend for StreamDeckBackend {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.device.reset().map_err(hid_error)?;
        self.device.clear_all_button_images().map_err(hid_error)?;
        self.pressed.iter_mut().for_each(|p| *p = false);
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<(), DeviceError> {
        self.device.set_brightness(percent).map_err(hid_error)
    }

    fn set_key_image(&mut self, index: usize, image: &KeyImage) -> Result<(), DeviceError> {
        let key = self.check_index(index)?;
        match image {
            KeyImage::Blank => self.device.clear_button_image(key).map_err(hid_error),
            KeyImage::Face(face) => {
                let img = self.render_face(face);
                self.device
                    .set_button_image(key, DynamicImage::ImageRgb8(img))
                    .map_err(hid_error)
            }
            KeyImage::Frame(frame) => self
                .device
                .set_button_image(key, DynamicImage::ImageRgb8(frame.clone()))
                .map_err(hid_error),
        }
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.device.flush().map_err(hid_error)
    }

    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<KeyEvent>, DeviceError> {
        let input = self.device.read_input(Some(timeout)).map_err(hid_error)?;
        let StreamDeckInput::ButtonStateChange(states) = input else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for (index, (&now, was)) in states.iter().zip(self.pressed.iter_mut()).enumerate() {
            if now != *was {
                *was = now;
                events.push(KeyEvent {
                    index,
                    pressed: now,
                });
            }
        }
        Ok(events)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.device.clear_all_button_images().map_err(hid_error)?;
        self.device.flush().map_err(hid_error)
    }
}
