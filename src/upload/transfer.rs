//! Chunked transfer engine
//!
//! Streams one PATCH body into the blob of an upload through a fixed
//! [`READ_BUFFER_SIZE`] buffer. Every chunk is written and flushed before the
//! stored offset advances, so a process crash can only leave the recorded
//! offset behind the written bytes, never ahead of them. Surviving a power
//! loss as well needs [`ChunkedTransfer::sync_data`], which syncs each chunk
//! to disk before its offset is recorded.
//!
//! Extensions that verify the body see it through [`BodyObservers`], one
//! chunk at a time, so memory per transfer stays bounded by the buffer.
//!
//! Cancellation is cooperative: the token is polled once per iteration and an
//! in-flight read is never interrupted. Each read gets its own time budget, so
//! a long transfer is not cut off as a whole, but a client that stops sending
//! is.

use super::{UploadId, Uploads};
use crate::extension::BodyObservers;
use crate::protocol::{TusError, READ_BUFFER_SIZE};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default per-iteration time budget
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a transfer stopped before its declared length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The request's cancellation token fired
    Cancelled,
    /// The body stream failed or ended early
    Disconnected,
    /// No bytes arrived within the per-iteration budget
    TimedOut,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::Cancelled => "cancelled",
            AbortReason::Disconnected => "disconnected",
            AbortReason::TimedOut => "timed_out",
        }
    }
}

/// How a transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All `Content-Length` bytes were written
    Completed,
    /// Stopped early; the bytes written so far stay valid
    Aborted(AbortReason),
}

/// Result of a transfer that did not fail
#[derive(Debug)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    /// Bytes written by this request
    pub bytes_written: u64,
    /// Stored offset after the transfer
    pub offset: u64,
}

/// One PATCH worth of bytes, appended at the stored offset
pub struct ChunkedTransfer<'a> {
    uploads: &'a Uploads,
    id: &'a UploadId,
    offset: u64,
    final_length: u64,
    content_length: u64,
    chunk_timeout: Duration,
    cancel: CancellationToken,
    observers: Option<&'a mut BodyObservers>,
    sync_data: bool,
}

impl<'a> ChunkedTransfer<'a> {
    /// `offset` must be the offset currently stored for `id`
    pub fn new(
        uploads: &'a Uploads,
        id: &'a UploadId,
        offset: u64,
        final_length: u64,
        content_length: u64,
    ) -> Self {
        Self {
            uploads,
            id,
            offset,
            final_length,
            content_length,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            cancel: CancellationToken::new(),
            observers: None,
            sync_data: false,
        }
    }

    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Feed every written chunk to `observers`
    pub fn observe(mut self, observers: &'a mut BodyObservers) -> Self {
        self.observers = Some(observers);
        self
    }

    /// `fdatasync` each chunk before recording its offset
    pub fn sync_data(mut self, sync: bool) -> Self {
        self.sync_data = sync;
        self
    }

    #[tracing::instrument(
        name = "upload.transfer",
        skip(self, body),
        fields(
            upload.id = %self.id,
            upload.offset = self.offset,
            upload.content_length = self.content_length,
            upload.bytes_written = tracing::field::Empty
        ),
        err
    )]
    pub async fn run<R>(mut self, mut body: R) -> Result<TransferReport, TusError>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = self
            .uploads
            .storage()
            .open_writer(self.id.as_str(), self.offset)
            .await?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut written: u64 = 0;
        let mut offset = self.offset;

        let outcome = loop {
            if written == self.content_length {
                break TransferOutcome::Completed;
            }

            if self.cancel.is_cancelled() {
                break TransferOutcome::Aborted(AbortReason::Cancelled);
            }

            let n = match tokio::time::timeout(self.chunk_timeout, body.read(&mut buf)).await {
                Err(_) => break TransferOutcome::Aborted(AbortReason::TimedOut),
                Ok(Err(e)) => {
                    debug!(error = %e, "Request body failed mid-transfer");
                    break TransferOutcome::Aborted(AbortReason::Disconnected);
                }
                Ok(Ok(0)) => break TransferOutcome::Aborted(AbortReason::Disconnected),
                Ok(Ok(n)) => n,
            };
            let chunk = &buf[..n];
            let len = n as u64;

            if offset + len > self.final_length {
                warn!(
                    offset,
                    chunk = len,
                    final_length = self.final_length,
                    "Chunk would overflow the final length"
                );
                return Err(TusError::Overflow(format!(
                    "{} bytes at offset {} exceed Final-Length {}",
                    len, offset, self.final_length
                )));
            }
            if written + len > self.content_length {
                warn!(
                    written,
                    chunk = len,
                    content_length = self.content_length,
                    "Chunk would overflow the declared Content-Length"
                );
                return Err(TusError::Overflow(format!(
                    "received more than the declared Content-Length {}",
                    self.content_length
                )));
            }

            writer
                .write_all(chunk)
                .await
                .map_err(|e| TusError::StorageIo(format!("write to {} failed: {}", self.id, e)))?;
            writer
                .flush()
                .await
                .map_err(|e| TusError::StorageIo(format!("flush of {} failed: {}", self.id, e)))?;
            if self.sync_data {
                writer.sync_data().await.map_err(|e| {
                    TusError::StorageIo(format!("sync of {} failed: {}", self.id, e))
                })?;
            }

            written += len;
            offset += len;
            self.uploads.set_offset(self.id, offset).await?;

            if let Some(observers) = self.observers.as_mut() {
                observers.update(chunk);
            }

            trace!(written, offset, "Chunk stored");
        };

        tracing::Span::current().record("upload.bytes_written", written);

        Ok(TransferReport {
            outcome,
            bytes_written: written,
            offset,
        })
    }
}
