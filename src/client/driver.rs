//! Upload Driver
//!
//! Sending-side state machine:
//!
//! ```text
//! Fingerprinting -> Negotiating -> Transferring(needs) -> Verifying -> Complete
//!                                        ^                   |
//!                                        +-------------------+   (needs not empty)
//! ```
//!
//! Any state can end in `Failed`. The server's `needs` is authoritative: after
//! each transfer round the driver handshakes again and only trusts the answer.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::fingerprint::{chunk_id, fingerprint_file, FileFingerprint, FingerprintEvent};
use super::transport::{ClientError, UploadTransport};
use crate::upload::{
    ChunkUploadResponse, HandshakeRequest, HandshakeResponse, HandshakeStatus, DEFAULT_CHUNK_SIZE,
};

/// Tuning knobs for [`UploadDriver`]
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub chunk_size: usize,
    /// Chunks in flight at once
    pub parallelism: usize,
    /// Extra attempts per request after a retryable failure
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_delay: Duration,
    /// Transfer rounds before giving up
    pub max_rounds: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: 4,
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            max_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Fingerprinting,
    Negotiating,
    Transferring { remaining: usize },
    Verifying,
    Complete,
    Failed,
}

/// Progress notification from a running upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    State(DriverState),
    Hashed { current: usize, total: usize },
    ChunkSent { chunk_id: String, bytes: usize },
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub file_id: String,
    pub locator: String,
    /// Status of the first handshake; `Complete` means nothing was transferred
    pub initial_status: HandshakeStatus,
    pub chunks_sent: usize,
    pub bytes_sent: u64,
    pub rounds: usize,
}

/// Drives one file through fingerprinting, negotiation and transfer
#[derive(Clone)]
pub struct UploadDriver {
    transport: Arc<dyn UploadTransport>,
    options: DriverOptions,
}

impl UploadDriver {
    pub fn new(transport: Arc<dyn UploadTransport>, options: DriverOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Upload the file at `path`, publishing it under `extension`
    pub async fn upload_file<F>(
        &self,
        path: &Path,
        extension: &str,
        mut on_event: F,
    ) -> Result<UploadReport, ClientError>
    where
        F: FnMut(&DriverEvent) + Send,
    {
        let result = self.run(path, extension, &mut on_event).await;
        if let Err(e) = &result {
            tracing::warn!(path = %path.display(), error = %e, "Upload failed");
            on_event(&DriverEvent::State(DriverState::Failed));
        }
        result
    }

    async fn run<F>(
        &self,
        path: &Path,
        extension: &str,
        on_event: &mut F,
    ) -> Result<UploadReport, ClientError>
    where
        F: FnMut(&DriverEvent) + Send,
    {
        on_event(&DriverEvent::State(DriverState::Fingerprinting));
        let fingerprint = fingerprint_file(path, self.options.chunk_size)
            .finish(|event| {
                if let FingerprintEvent::Progress { current, total } = event {
                    on_event(&DriverEvent::Hashed {
                        current: *current,
                        total: *total,
                    });
                }
            })
            .await?;

        tracing::info!(
            file_id = %fingerprint.file_id,
            file_size = fingerprint.file_size,
            chunks = fingerprint.chunks.len(),
            "File fingerprinted"
        );

        let request = HandshakeRequest {
            file_id: Some(fingerprint.file_id.clone()),
            extension: Some(extension.to_string()),
            chunk_ids: Some(fingerprint.chunk_ids()),
        };

        on_event(&DriverEvent::State(DriverState::Negotiating));
        let mut response = self.handshake(&request).await?;
        let initial_status = response.status;

        let mut chunks_sent = 0;
        let mut bytes_sent = 0u64;
        let mut rounds = 0;

        while response.status != HandshakeStatus::Complete {
            if rounds == self.options.max_rounds {
                return Err(ClientError::Stalled(rounds));
            }
            rounds += 1;

            on_event(&DriverEvent::State(DriverState::Transferring {
                remaining: response.needs.len(),
            }));

            let mut transfers = stream::iter(response.needs.iter())
                .map(|id| self.send_chunk(path, &fingerprint, id))
                .buffer_unordered(self.options.parallelism.max(1));

            while let Some(result) = transfers.next().await {
                match result {
                    Ok((chunk_id, bytes, _)) => {
                        chunks_sent += 1;
                        bytes_sent += bytes as u64;
                        on_event(&DriverEvent::ChunkSent { chunk_id, bytes });
                    }
                    // The next handshake reports what is still missing
                    Err(e) if e.is_retryable() || e.needs_handshake() => {
                        tracing::warn!(
                            file_id = %fingerprint.file_id,
                            round = rounds,
                            error = %e,
                            "Chunk upload failed, will renegotiate"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            drop(transfers);

            on_event(&DriverEvent::State(DriverState::Verifying));
            response = self.handshake(&request).await?;
        }

        let locator = response
            .locator
            .ok_or_else(|| ClientError::InvalidResponse("complete without locator".to_string()))?;

        tracing::info!(
            file_id = %fingerprint.file_id,
            locator = %locator,
            chunks_sent = chunks_sent,
            rounds = rounds,
            "Upload complete"
        );
        on_event(&DriverEvent::State(DriverState::Complete));

        Ok(UploadReport {
            file_id: fingerprint.file_id,
            locator,
            initial_status,
            chunks_sent,
            bytes_sent,
            rounds,
        })
    }

    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, ClientError> {
        self.with_retries(|| self.transport.handshake(request)).await
    }

    /// Read, re-verify and upload one chunk the server asked for
    async fn send_chunk(
        &self,
        path: &Path,
        fingerprint: &FileFingerprint,
        id: &str,
    ) -> Result<(String, usize, ChunkUploadResponse), ClientError> {
        let descriptor = fingerprint
            .chunk(id)
            .ok_or_else(|| ClientError::InvalidResponse(format!("server needs unknown chunk {}", id)))?;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(descriptor.range.start)).await?;
        let mut data = vec![0u8; descriptor.range.len()];
        file.read_exact(&mut data).await?;

        if chunk_id(&data, descriptor.range.index) != id {
            return Err(ClientError::FileChanged(id.to_string()));
        }

        let bytes = data.len();
        let response = self
            .with_retries(|| {
                self.transport
                    .upload_chunk(&fingerprint.file_id, id, data.clone())
            })
            .await?;

        Ok((id.to_string(), bytes, response))
    }

    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt = attempt, error = %e, "Retrying request");
                    tokio::time::sleep(self.options.retry_delay * attempt).await;
                }
                result => return result,
            }
        }
    }
}
