//! Mixer control protocol.
//!
//! The mixer speaks newline-terminated lines of space-separated ASCII tokens
//! over a single persistent stream connection. Commands flow out, status
//! lines flow back; the two directions are independent.

pub mod commands;
pub mod status;

pub use commands::MixerCommand;
pub use status::StatusLine;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Default TCP port of the mixer control endpoint.
pub const DEFAULT_MIXER_PORT: u16 = 9999;

/// Longest status line kept, in bytes. Longer lines are skipped.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors raised while encoding or decoding protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("`{prefix}` line is missing {what}: {line:?}")]
    MissingField {
        prefix: &'static str,
        what: &'static str,
        line: String,
    },

    #[error("invalid JSON payload in `{prefix}` line: {message}")]
    InvalidPayload {
        prefix: &'static str,
        message: String,
    },

    #[error("invalid mixer command: {0:?}")]
    InvalidCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one newline-terminated line.
///
/// Returns `Ok(None)` when the peer has closed the stream. The trailing
/// line ending is stripped and invalid UTF-8 is replaced lossily, so one
/// garbled byte never takes the reader down.
///
/// A line longer than [`MAX_LINE_LEN`] is dropped with a warning and
/// reading resumes after its newline, so `buf` never grows past the limit.
///
/// Cancel safe: bytes of an unfinished line stay in `buf` and are picked up
/// by the next call with the same buffer. Cancelling while an oversized
/// line is being skipped leaves its tail to be read as a line of its own.
pub async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let limit = (MAX_LINE_LEN + 1).saturating_sub(buf.len()) as u64;
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 && buf.is_empty() {
            return Ok(None);
        }
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
        if buf.len() > MAX_LINE_LEN {
            warn!(
                "[Protocol] Skipping line longer than {} bytes",
                MAX_LINE_LEN
            );
            buf.clear();
            skip_line(reader).await?;
        }
    }

    let line = String::from_utf8_lossy(&buf[..])
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    Ok(Some(line))
}

/// Consume input up to and including the next newline.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Write a single command line and flush.
pub async fn write_command<W>(writer: &mut W, command: &MixerCommand) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(command.to_line().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write several commands in one buffered write.
pub async fn write_commands<W>(writer: &mut W, commands: &[MixerCommand]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload: String = commands.iter().map(MixerCommand::to_line).collect();
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_line_splits_on_newlines_and_reports_eof() {
        let mut input: &[u8] = b"stream_status live\r\naudio_status {}\npartial";
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("stream_status live")
        );
        assert_eq!(
            read_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("audio_status {}")
        );
        assert_eq!(
            read_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("partial")
        );
        assert!(read_line(&mut input, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_line_survives_invalid_utf8() {
        let mut input: &[u8] = b"stream_status \xff live\n";
        let mut buf = Vec::new();
        let line = read_line(&mut input, &mut buf).await.unwrap().unwrap();
        assert!(line.starts_with("stream_status "));
        assert!(line.ends_with(" live"));
    }

    #[tokio::test]
    async fn overlong_line_is_skipped_and_reading_resumes() {
        let mut raw = vec![b'x'; MAX_LINE_LEN * 2 + 17];
        raw.extend_from_slice(b"\nstream_status live\n");
        let mut input: &[u8] = &raw;
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut input, &mut buf).await.unwrap().as_deref(),
            Some("stream_status live")
        );
        assert!(buf.capacity() <= 2 * (MAX_LINE_LEN + 1));
        assert!(read_line(&mut input, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_at_the_limit_is_kept() {
        let mut raw = vec![b'y'; MAX_LINE_LEN];
        raw.push(b'\n');
        let mut input: &[u8] = &raw;
        let mut buf = Vec::new();

        let line = read_line(&mut input, &mut buf).await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
    }

    #[tokio::test]
    async fn status_queries_are_written_as_one_batch() {
        let mut out = Vec::new();
        write_commands(&mut out, &MixerCommand::status_queries())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "get_composite_mode_and_video_status\nget_stream_status\nget_audio\n"
        );
    }
}
