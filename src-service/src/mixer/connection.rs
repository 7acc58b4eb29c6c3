//! Persistent mixer control connection.
//!
//! One adapter task owns the TCP stream. Status lines are read and folded
//! into the state store while queued commands are written on the same
//! connection; the two directions run as independent futures. When the
//! peer goes away the mixer-derived state is cleared and the adapter
//! reconnects with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voctodeck_common::protocol::{
    read_line, write_command, write_commands, MixerCommand, ProtocolError,
};
use voctodeck_common::StateKey;

use super::parser::StatusInterpreter;
use crate::config::MixerConfig;
use crate::state::SharedStore;

/// Errors returned to callers submitting commands.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("mixer is not connected")]
    Disconnected,

    #[error("mixer adapter has stopped")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Cloneable command submission handle.
#[derive(Debug, Clone)]
pub struct MixerHandle {
    tx: UnboundedSender<MixerCommand>,
    connected: Arc<AtomicBool>,
}

impl MixerHandle {
    /// Queue a command for the current connection.
    ///
    /// Commands are never buffered across reconnects; while disconnected
    /// this fails with [`MixerError::Disconnected`].
    pub fn send(&self, command: MixerCommand) -> Result<(), MixerError> {
        command.validate()?;
        if !self.is_connected() {
            return Err(MixerError::Disconnected);
        }
        self.tx.send(command).map_err(|_| MixerError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Owner of the mixer connection.
pub struct MixerAdapter {
    config: MixerConfig,
    store: SharedStore,
    interpreter: StatusInterpreter,
    commands: UnboundedReceiver<MixerCommand>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Create a connected pair of handle and adapter.
pub fn mixer_channel(
    config: MixerConfig,
    store: SharedStore,
    interpreter: StatusInterpreter,
    cancel: CancellationToken,
) -> (MixerHandle, MixerAdapter) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let handle = MixerHandle {
        tx,
        connected: Arc::clone(&connected),
    };
    let adapter = MixerAdapter {
        config,
        store,
        interpreter,
        commands: rx,
        connected,
        cancel,
    };
    (handle, adapter)
}

/// How a connected session ended.
enum SessionEnd {
    PeerClosed,
    Shutdown,
}

impl MixerAdapter {
    /// Connect, serve and reconnect until cancelled.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            match self.connect().await {
                Ok(stream) => {
                    info!("[Mixer] Connected to {}", self.config.address);
                    failures = 0;

                    let end = self.session(stream).await;
                    self.connected.store(false, Ordering::SeqCst);
                    if self.store.reset(StateKey::mixer_keys()) {
                        debug!("[Mixer] Cleared mixer state");
                    }

                    match end {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::PeerClosed) => warn!("[Mixer] Connection closed by peer"),
                        Err(e) => warn!("[Mixer] Connection lost: {}", e),
                    }
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!("[Mixer] Connect to {} failed: {}", self.config.address, e);
                }
            }

            self.drop_queued();
            let delay = backoff_after(&self.config, failures);
            failures = failures.saturating_add(1);
            debug!("[Mixer] Reconnecting in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("[Mixer] Stopped");
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let address = self.config.address.as_str();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "shutdown requested",
            )),
            result = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(address)) => {
                match result {
                    Ok(stream) => stream,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    )),
                }
            }
        }
    }

    async fn session(&mut self, stream: TcpStream) -> Result<SessionEnd, ProtocolError> {
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();

        write_commands(&mut write_half, &MixerCommand::status_queries()).await?;
        self.connected.store(true, Ordering::SeqCst);

        let end = {
            let reading = read_status(read_half, &self.interpreter, &self.store);
            let writing = write_queued(&mut write_half, &mut self.commands);
            tokio::select! {
                _ = self.cancel.cancelled() => Ok(SessionEnd::Shutdown),
                result = reading => result.map(|_| SessionEnd::PeerClosed),
                result = writing => result.map(|_| SessionEnd::PeerClosed),
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = write_half.shutdown().await {
            debug!("[Mixer] Shutdown of write half failed: {}", e);
        }
        end
    }

    fn drop_queued(&mut self) {
        let mut dropped = 0;
        while let Ok(command) = self.commands.try_recv() {
            warn!("[Mixer] Dropping `{}`: not connected", command);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("[Mixer] Dropped {} queued commands", dropped);
        }
    }
}

/// Read status lines until the peer closes the stream.
async fn read_status(
    read_half: OwnedReadHalf,
    interpreter: &StatusInterpreter,
    store: &SharedStore,
) -> Result<(), ProtocolError> {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(1024);

    while let Some(line) = read_line(&mut reader, &mut buf).await? {
        debug!("[Mixer] <- {}", line);
        let facts = interpreter.interpret_line(&line);
        if !facts.is_empty() {
            store.apply(&facts);
        }
    }
    Ok(())
}

/// Write queued commands. Never returns `Ok` while handles remain.
async fn write_queued(
    write_half: &mut OwnedWriteHalf,
    commands: &mut UnboundedReceiver<MixerCommand>,
) -> Result<(), ProtocolError> {
    while let Some(command) = commands.recv().await {
        debug!("[Mixer] -> {}", command);
        write_command(write_half, &command).await?;
    }
    // Every handle is gone; keep the read side alive.
    std::future::pending::<()>().await;
    Ok(())
}

/// Delay after `failures` consecutive failed attempts.
pub fn backoff_after(config: &MixerConfig, failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures);
    config
        .backoff_initial()
        .saturating_mul(factor)
        .min(config.backoff_max())
}
