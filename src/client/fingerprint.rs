//! Fingerprint Engine
//!
//! SHA-256 over every planned chunk and over the whole file. File hashing
//! runs on a blocking worker that reports through a bounded channel, so the
//! caller stays responsive and only awaits the terminal event.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::plan::{ChunkPlan, ChunkRange};
use crate::upload::ChunkId;

/// Events buffered between the hashing worker and its consumer
const EVENT_BUFFER: usize = 16;

/// A planned chunk with its content-derived id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub id: String,
    pub range: ChunkRange,
}

/// Fingerprint of a whole file and its chunk plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub file_id: String,
    pub file_size: u64,
    pub chunk_size: usize,
    pub chunks: Vec<ChunkDescriptor>,
}

impl FileFingerprint {
    /// Chunk ids in plan order
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.id.clone()).collect()
    }

    pub fn chunk(&self, id: &str) -> Option<&ChunkDescriptor> {
        self.chunks.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Fingerprinting failed: {0}")]
    Failed(String),

    #[error("Fingerprint worker stopped without a result")]
    Interrupted,
}

/// Message from the hashing worker
#[derive(Debug)]
pub enum FingerprintEvent {
    /// `current` of `total` chunks hashed
    Progress { current: usize, total: usize },
    /// One chunk hashed, in index order
    Chunk {
        id: String,
        index: usize,
        data: Vec<u8>,
    },
    Complete(FileFingerprint),
    Failed(String),
}

/// Id of the chunk at `index` holding `bytes`
pub fn chunk_id(bytes: &[u8], index: usize) -> String {
    ChunkId::new(hex::encode(Sha256::digest(bytes)), index).to_string()
}

/// Fingerprint an in-memory buffer
pub fn fingerprint_bytes(data: &[u8], chunk_size: usize) -> FileFingerprint {
    let plan = ChunkPlan::new(data.len() as u64, chunk_size);
    let chunks = plan
        .ranges()
        .iter()
        .map(|range| ChunkDescriptor {
            id: chunk_id(&data[range.start as usize..range.end as usize], range.index),
            range: *range,
        })
        .collect();

    FileFingerprint {
        file_id: hex::encode(Sha256::digest(data)),
        file_size: plan.file_size(),
        chunk_size: plan.chunk_size(),
        chunks,
    }
}

/// Start fingerprinting a file on a background worker
pub fn fingerprint_file(path: impl Into<PathBuf>, chunk_size: usize) -> FingerprintTask {
    let path = path.into();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let handle = tokio::task::spawn_blocking(move || {
        let terminal = match hash_file(&path, chunk_size, &tx) {
            Ok(Some(fingerprint)) => FingerprintEvent::Complete(fingerprint),
            // Consumer went away
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Fingerprinting failed");
                FingerprintEvent::Failed(format!("{}: {}", path.display(), e))
            }
        };
        let _ = tx.blocking_send(terminal);
    });

    FingerprintTask { rx, handle }
}

/// Hash `path` in index order; `Ok(None)` when the receiver was dropped
fn hash_file(
    path: &Path,
    chunk_size: usize,
    tx: &mpsc::Sender<FingerprintEvent>,
) -> std::io::Result<Option<FileFingerprint>> {
    let mut file = File::open(path)?;
    let plan = ChunkPlan::new(file.metadata()?.len(), chunk_size);
    let total = plan.len();

    let mut file_hasher = Sha256::new();
    let mut chunks = Vec::with_capacity(total);

    for range in plan.ranges() {
        let mut data = vec![0u8; range.len()];
        file.seek(SeekFrom::Start(range.start))?;
        file.read_exact(&mut data)?;

        file_hasher.update(&data);
        let id = chunk_id(&data, range.index);
        chunks.push(ChunkDescriptor {
            id: id.clone(),
            range: *range,
        });

        let chunk = FingerprintEvent::Chunk {
            id,
            index: range.index,
            data,
        };
        let progress = FingerprintEvent::Progress {
            current: range.index + 1,
            total,
        };
        if tx.blocking_send(chunk).is_err() || tx.blocking_send(progress).is_err() {
            return Ok(None);
        }
    }

    Ok(Some(FileFingerprint {
        file_id: hex::encode(file_hasher.finalize()),
        file_size: plan.file_size(),
        chunk_size: plan.chunk_size(),
        chunks,
    }))
}

/// Handle to a running fingerprint worker
///
/// Dropping the task stops the worker at its next send.
pub struct FingerprintTask {
    rx: mpsc::Receiver<FingerprintEvent>,
    handle: JoinHandle<()>,
}

impl FingerprintTask {
    /// Next event, or `None` once the worker has exited
    pub async fn next_event(&mut self) -> Option<FingerprintEvent> {
        self.rx.recv().await
    }

    /// Drain events until the terminal one, passing each to `on_event`
    pub async fn finish<F>(mut self, mut on_event: F) -> Result<FileFingerprint, FingerprintError>
    where
        F: FnMut(&FingerprintEvent),
    {
        while let Some(event) = self.next_event().await {
            on_event(&event);
            match event {
                FingerprintEvent::Complete(fingerprint) => return Ok(fingerprint),
                FingerprintEvent::Failed(message) => return Err(FingerprintError::Failed(message)),
                FingerprintEvent::Progress { .. } | FingerprintEvent::Chunk { .. } => {}
            }
        }

        if let Err(e) = (&mut self.handle).await {
            return Err(FingerprintError::Failed(e.to_string()));
        }
        Err(FingerprintError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::is_sha256_hex;
    use tempfile::TempDir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_deterministic() {
        let data = sample(10_000);
        assert_eq!(fingerprint_bytes(&data, 1024), fingerprint_bytes(&data, 1024));
    }

    #[test]
    fn test_ids_are_positional() {
        // Every chunk has identical content
        let data = vec![0xAB; 4096];
        let fp = fingerprint_bytes(&data, 1024);

        assert_eq!(fp.chunks.len(), 4);
        let mut ids = fp.chunk_ids();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert!(fp.chunks[0].id.ends_with('0'));
        assert_eq!(&fp.chunks[0].id[..64], &fp.chunks[3].id[..64]);
    }

    #[test]
    fn test_ids_have_fingerprint_shape() {
        let fp = fingerprint_bytes(b"hello world", 4);
        assert!(is_sha256_hex(&fp.file_id));
        assert!(ChunkId::parse(&fp.chunks[2].id).is_some());
        assert_eq!(fp.chunks[2].id, chunk_id(b"rld", 2));
    }

    #[test]
    fn test_empty_input() {
        let fp = fingerprint_bytes(b"", 1024);
        assert!(fp.chunks.is_empty());
        assert_eq!(fp.file_size, 0);
        assert_eq!(fp.file_id, hex::encode(Sha256::digest(b"")));
    }

    #[tokio::test]
    async fn test_file_matches_in_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data = sample(50_000);
        std::fs::write(&path, &data).unwrap();

        let mut progress = Vec::new();
        let mut chunk_events = 0;
        let fp = fingerprint_file(&path, 8192)
            .finish(|event| match event {
                FingerprintEvent::Progress { current, total } => progress.push((*current, *total)),
                FingerprintEvent::Chunk { .. } => chunk_events += 1,
                _ => {}
            })
            .await
            .unwrap();

        assert_eq!(fp, fingerprint_bytes(&data, 8192));
        assert_eq!(chunk_events, 7);
        assert_eq!(progress.last(), Some(&(7, 7)));
    }

    #[tokio::test]
    async fn test_chunk_events_in_index_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, sample(5000)).unwrap();

        let mut task = fingerprint_file(&path, 1000);
        let mut indices = Vec::new();
        while let Some(event) = task.next_event().await {
            match event {
                FingerprintEvent::Chunk { index, data, .. } => {
                    assert_eq!(data.len(), 1000);
                    indices.push(index);
                }
                FingerprintEvent::Complete(_) => break,
                FingerprintEvent::Failed(message) => panic!("{}", message),
                FingerprintEvent::Progress { .. } => {}
            }
        }

        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();

        let result = fingerprint_file(dir.path().join("absent.bin"), 0)
            .finish(|_| {})
            .await;

        assert!(matches!(result, Err(FingerprintError::Failed(_))));
    }
}
