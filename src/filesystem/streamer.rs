//! Validated, cancellation-aware file streaming

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::protocol::{LibraryError, ResolvedRom, StreamOutcome};

use super::security::PathValidator;

#[derive(Debug, thiserror::Error)]
#[error("consumer disconnected")]
pub struct ConsumerGone;

/// Destination for a streamed file body
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Total body length. Called once, before the first `write`.
    fn declare_length(&mut self, len: u64);

    async fn write(&mut self, chunk: Bytes) -> Result<(), ConsumerGone>;

    /// Resolves once whoever reads the sink has gone away
    async fn consumer_gone(&self);

    /// The whole body has been written
    async fn close(&mut self);

    /// The body is broken; the consumer must not treat it as complete
    async fn abort(&mut self, error: io::Error);
}

/// Counts file handles held by in-flight downloads
#[derive(Debug, Default)]
pub struct HandleGauge {
    open: AtomicUsize,
    released: AtomicU64,
}

impl HandleGauge {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

/// Owns the file for one transfer and reports its release exactly once
struct OpenRom {
    file: File,
    gauge: Arc<HandleGauge>,
}

impl OpenRom {
    fn new(file: File, gauge: Arc<HandleGauge>) -> Self {
        gauge.open.fetch_add(1, Ordering::SeqCst);
        Self { file, gauge }
    }
}

impl Drop for OpenRom {
    fn drop(&mut self) {
        self.gauge.open.fetch_sub(1, Ordering::SeqCst);
        self.gauge.released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(open = self.gauge.open(), "Released download handle");
    }
}

enum ReadStep {
    Data(usize),
    Gone,
}

#[derive(Clone)]
pub struct SecureFileStreamer {
    validator: Arc<PathValidator>,
    chunk_size: usize,
    gauge: Arc<HandleGauge>,
}

impl SecureFileStreamer {
    pub fn new(validator: Arc<PathValidator>, chunk_size: usize) -> Self {
        Self {
            validator,
            chunk_size: chunk_size.max(1),
            gauge: Arc::new(HandleGauge::default()),
        }
    }

    pub fn gauge(&self) -> &HandleGauge {
        &self.gauge
    }

    /// Validate an untrusted, percent-encoded name
    pub async fn resolve(&self, raw_name: &str) -> Result<ResolvedRom, LibraryError> {
        self.validator.resolve(raw_name).await
    }

    /// Stream `rom` into `sink`.
    ///
    /// The length is declared only once the file is open, stat'ed and its
    /// first chunk read, so every `Err` leaves the sink untouched. Failures
    /// after that point abort the sink and come back as
    /// `StreamOutcome::Aborted`.
    pub async fn stream(
        &self,
        rom: &ResolvedRom,
        sink: &mut dyn ByteSink,
    ) -> Result<StreamOutcome, LibraryError> {
        let file = File::open(&rom.path).await.map_err(stream_failed)?;
        let mut handle = OpenRom::new(file, self.gauge.clone());
        let size = handle.file.metadata().await.map_err(stream_failed)?.len();

        let mut buffer = vec![0u8; self.chunk_size];
        let mut remaining = size;
        let mut sent: u64 = 0;

        let mut pending = match next_read(&mut handle.file, &mut buffer, remaining, &*sink)
            .await
            .map_err(stream_failed)?
        {
            ReadStep::Gone => {
                tracing::debug!("Consumer left before {} started", rom.name);
                return Ok(StreamOutcome::ConsumerGone { bytes_sent: 0 });
            }
            ReadStep::Data(0) if size > 0 => {
                return Err(stream_failed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file truncated before streaming started",
                )));
            }
            ReadStep::Data(n) => n,
        };

        sink.declare_length(size);

        loop {
            if pending > 0 {
                let chunk = Bytes::copy_from_slice(&buffer[..pending]);
                if sink.write(chunk).await.is_err() {
                    tracing::debug!("Consumer left {} after {} bytes", rom.name, sent);
                    return Ok(StreamOutcome::ConsumerGone { bytes_sent: sent });
                }
                sent += pending as u64;
                remaining -= pending as u64;
            }

            if remaining == 0 {
                sink.close().await;
                return Ok(StreamOutcome::Completed { bytes: sent });
            }

            match next_read(&mut handle.file, &mut buffer, remaining, &*sink).await {
                Ok(ReadStep::Data(0)) => {
                    tracing::warn!(
                        "{} shrank while streaming ({} of {} bytes sent)",
                        rom.name,
                        sent,
                        size
                    );
                    sink.abort(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during transfer",
                    ))
                    .await;
                    return Ok(StreamOutcome::Aborted { bytes_sent: sent });
                }
                Ok(ReadStep::Data(n)) => pending = n,
                Ok(ReadStep::Gone) => {
                    tracing::debug!("Consumer left {} after {} bytes", rom.name, sent);
                    return Ok(StreamOutcome::ConsumerGone { bytes_sent: sent });
                }
                Err(e) => {
                    tracing::warn!(
                        "Read failed mid-transfer for {} after {} bytes: {}",
                        rom.name,
                        sent,
                        e
                    );
                    sink.abort(e).await;
                    return Ok(StreamOutcome::Aborted { bytes_sent: sent });
                }
            }
        }
    }
}

/// Read the next chunk unless the consumer disappears first
async fn next_read(
    file: &mut File,
    buffer: &mut [u8],
    remaining: u64,
    sink: &dyn ByteSink,
) -> io::Result<ReadStep> {
    let want = remaining.min(buffer.len() as u64) as usize;
    if want == 0 {
        return Ok(ReadStep::Data(0));
    }
    tokio::select! {
        biased;
        _ = sink.consumer_gone() => Ok(ReadStep::Gone),
        read = file.read(&mut buffer[..want]) => read.map(ReadStep::Data),
    }
}

fn stream_failed(source: io::Error) -> LibraryError {
    tracing::warn!("Could not start download: {}", source);
    LibraryError::StreamFailed { source }
}
