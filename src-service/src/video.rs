//! Raw video preview on a single key.
//!
//! A frame source connects once and streams fixed-size RGB frames with no
//! framing; boundaries are purely byte counts. Every complete frame is
//! scaled to the key and handed straight to the device session, bypassing
//! the state store. The key belongs to the video source only while frames
//! flow; afterwards the render dispatcher paints it again.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::deck::{DeckHandle, KeyImage};
use crate::render::RedrawTrigger;

/// The video key and whether a frame source currently owns it.
#[derive(Debug, Clone)]
pub struct VideoKey {
    pub index: usize,
    live: Arc<AtomicBool>,
}

impl VideoKey {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether frames are being drawn on the key right now.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Hand the key to the frame source. Returns true if it was free.
    pub fn claim(&self) -> bool {
        !self.live.swap(true, Ordering::SeqCst)
    }

    /// Give the key back to the renderer. Returns true if it was claimed.
    pub fn release(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

/// Turn one raw frame into a key bitmap of `key_size`.
///
/// Returns `None` if `raw` is shorter than `width * height * 3` bytes.
pub fn compose_frame(
    raw: &[u8],
    width: u32,
    height: u32,
    key_size: (u32, u32),
) -> Option<RgbImage> {
    let frame = RgbImage::from_raw(width, height, raw.to_vec())?;
    if frame.dimensions() == key_size {
        return Some(frame);
    }
    Some(imageops::resize(&frame, key_size.0, key_size.1, FilterType::Triangle))
}

pub struct VideoAdapter {
    listener: TcpListener,
    config: VideoConfig,
    key: VideoKey,
    target: DeckHandle,
    redraw: RedrawTrigger,
    cancel: CancellationToken,
}

impl VideoAdapter {
    /// Bind the listening socket.
    pub async fn bind(
        config: VideoConfig,
        key: VideoKey,
        target: DeckHandle,
        redraw: RedrawTrigger,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        info!(
            "[Video] Listening on {} for {}x{} frames (key {})",
            listener.local_addr()?,
            config.width,
            config.height,
            key.index
        );
        Ok(Self {
            listener,
            config,
            key,
            target,
            redraw,
            cancel,
        })
    }

    #[allow(dead_code)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one source and forward frames until it ends.
    pub async fn run(self) {
        let device_gone = self.target.cancelled().clone();
        let accepted = tokio::select! {
            _ = self.cancel.cancelled() => None,
            _ = device_gone.cancelled() => None,
            accepted = self.listener.accept() => Some(accepted),
        };

        match accepted {
            Some(Ok((stream, peer))) => {
                info!("[Video] Source connected from {}", peer);
                drop(self.listener);
                let cancel = self.cancel.clone();
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = device_gone.cancelled() => debug!("[Video] Target panel gone"),
                    _ = forward_frames(stream, &self.config, &self.key, &self.target) => {}
                }
                if self.key.release() {
                    debug!("[Video] Key {} handed back", self.key.index);
                    self.redraw.request();
                }
            }
            Some(Err(e)) => warn!("[Video] Accept failed: {}", e),
            None => {}
        }
        info!("[Video] Stopped");
    }
}

async fn forward_frames(
    mut stream: TcpStream,
    config: &VideoConfig,
    key: &VideoKey,
    target: &DeckHandle,
) {
    let mut buf = vec![0u8; config.frame_len()];
    let mut frames: u64 = 0;

    loop {
        match stream.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                info!("[Video] Stream ended after {} frames", frames);
                return;
            }
            Err(e) => {
                warn!("[Video] Read failed after {} frames: {}", frames, e);
                return;
            }
        }

        if let Some(image) = compose_frame(&buf, config.width, config.height, target.info.key_size)
        {
            key.claim();
            target.draw(key.index, KeyImage::Frame(image));
            frames += 1;
        }
    }
}
