//! Output sinks
//!
//! A transfer appends every resource to one exclusively owned sink. Sinks
//! that can report their position let the retry controller roll a failed
//! attempt back; a sink whose `position` fails disables retries for the
//! step, since a partial write to it cannot be undone.

use std::io::{self, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Append-only byte destination with optional position save/restore
#[async_trait]
pub trait OutputSink: Send {
    /// Append `piece` at the current position
    async fn write_piece(&mut self, piece: &[u8]) -> io::Result<()>;

    /// Current write offset, or an error if the sink is not seekable
    async fn position(&mut self) -> io::Result<u64>;

    /// Move the write offset back to `position`, discarding later bytes
    async fn rewind(&mut self, position: u64) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Seekable file sink
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Create (or truncate) the file at `path`
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path).await?))
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write_piece(&mut self, piece: &[u8]) -> io::Result<()> {
        self.file.write_all(piece).await
    }

    async fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position().await
    }

    async fn rewind(&mut self, position: u64) -> io::Result<()> {
        self.file.flush().await?;
        self.file.set_len(position).await?;
        self.file.seek(SeekFrom::Start(position)).await?;
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }
}

/// In-memory sink
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemorySink {
    data: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write_piece(&mut self, piece: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(piece);
        Ok(())
    }

    async fn position(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn rewind(&mut self, position: u64) -> io::Result<()> {
        let position = usize::try_from(position)
            .ok()
            .filter(|p| *p <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot rewind to {position}: only {} bytes written", self.data.len()),
                )
            })?;
        self.data.truncate(position);
        Ok(())
    }
}

/// Non-seekable sink over any writer, e.g. stdout
#[derive(Debug)]
pub struct StreamSink<W> {
    inner: W,
    written: u64,
}

impl<W> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Total bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn not_seekable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "output stream is not seekable")
}

#[async_trait]
impl<W> OutputSink for StreamSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_piece(&mut self, piece: &[u8]) -> io::Result<()> {
        self.inner.write_all(piece).await?;
        self.written += piece.len() as u64;
        Ok(())
    }

    async fn position(&mut self) -> io::Result<u64> {
        Err(not_seekable())
    }

    async fn rewind(&mut self, _position: u64) -> io::Result<()> {
        Err(not_seekable())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}
