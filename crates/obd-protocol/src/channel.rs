//! Command Channel
//!
//! Owns an open adapter stream and performs one request/response exchange at
//! a time: write the mnemonic, then read until the `>` prompt or a deadline.

use crate::command::{Command, InitCommand};
use crate::error::ChannelError;
use crate::frame::{FrameDecoder, RawFrame};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Minimum spacing between two writes on the same channel
pub const DEFAULT_MIN_SPACING_MS: u64 = 100;

/// How long to wait for the prompt after a write
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

const READ_BUFFER_SIZE: usize = 1024;

/// Timing knobs for a [`CommandChannel`]
#[derive(Debug, Clone, Copy)]
pub struct ChannelTiming {
    /// Minimum interval between consecutive writes
    pub min_spacing: Duration,
    /// Deadline for the prompt after each write
    pub read_timeout: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(DEFAULT_MIN_SPACING_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

/// Single-outstanding-request channel over any duplex byte stream
pub struct CommandChannel<S> {
    stream: Option<S>,
    decoder: FrameDecoder,
    timing: ChannelTiming,
    last_write: Option<Instant>,
}

impl<S> CommandChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream
    pub fn new(stream: S, timing: ChannelTiming) -> Self {
        Self {
            stream: Some(stream),
            decoder: FrameDecoder::new(),
            timing,
            last_write: None,
        }
    }

    /// Send a measurement command and wait for its frame
    pub async fn send(&mut self, command: Command) -> Result<RawFrame, ChannelError> {
        self.exchange(&command.wire()).await
    }

    /// Send an adapter set-up command
    pub async fn send_init(&mut self, command: InitCommand) -> Result<RawFrame, ChannelError> {
        self.exchange(&command.wire()).await
    }

    async fn exchange(&mut self, wire: &str) -> Result<RawFrame, ChannelError> {
        // Anything left over belongs to an earlier, abandoned exchange
        self.decoder.reset();
        self.discard_stale_input().await?;
        self.write_spaced(wire.as_bytes()).await?;
        self.read_frame().await
    }

    /// Drop bytes already waiting on the stream, such as a reply that
    /// arrived after its exchange timed out
    async fn discard_stale_input(&mut self) -> Result<(), ChannelError> {
        let stream = self.stream_mut()?;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            match tokio::time::timeout(Duration::ZERO, stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(n)) => debug!("Discarding stale input {:?}", String::from_utf8_lossy(&buf[..n])),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn write_spaced(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < self.timing.min_spacing {
                tokio::time::sleep(self.timing.min_spacing - elapsed).await;
            }
        }

        let stream = self.stream_mut()?;
        trace!("-> {:?}", String::from_utf8_lossy(bytes));
        stream.write_all(bytes).await?;
        stream.flush().await?;
        self.last_write = Some(Instant::now());
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<RawFrame, ChannelError> {
        let read_timeout = self.timing.read_timeout;
        let deadline = Instant::now() + read_timeout;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let stream = self.stream_mut()?;
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!("No prompt within {:?}", read_timeout);
                    return Err(ChannelError::Timeout(read_timeout.as_millis() as u64));
                }
            };

            if n == 0 {
                warn!("Adapter stream closed by peer");
                return Err(ChannelError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }

            trace!("<- {:?}", String::from_utf8_lossy(&buf[..n]));
            let decoded = self.decoder.feed(&buf[..n]);
            if decoded.prompts == 0 {
                continue;
            }

            // The newest frame is the one answering this write
            return decoded.frames.into_iter().last().ok_or(ChannelError::Empty);
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S, ChannelError> {
        self.stream
            .as_mut()
            .ok_or_else(|| ChannelError::Io(std::io::ErrorKind::NotConnected.into()))
    }

    /// Whether the stream is still held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Time of the most recent write
    pub fn last_write(&self) -> Option<Instant> {
        self.last_write
    }

    /// Shut the stream down; calling it again is a no-op
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing adapter stream");
            if let Err(e) = stream.shutdown().await {
                debug!("Adapter stream shutdown: {}", e);
            }
        }
        self.decoder.reset();
    }
}
