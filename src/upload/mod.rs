//! Resumable Chunked Upload Engine
//!
//! Implements reliable large file uploads with:
//! - Content-derived file and chunk identifiers
//! - Instant upload when the artifact is already stored
//! - Resume across disconnects and server restarts
//! - Atomic reassembly in plan order
//!
//! Protocol Flow:
//! 1. Client sends handshake with file id, extension and ordered chunk ids
//! 2. Server answers `complete` (with locator), `resume` or `start` with the missing chunks
//! 3. Client uploads the missing chunks, in any order and in parallel
//! 4. The upload that empties the missing-set triggers assembly and returns the locator

pub mod artifact_store;
pub mod assembly;
pub mod chunk_store;
mod handshake;
mod ingest;
pub mod locks;
pub mod service;
pub mod session;
pub mod types;

pub use artifact_store::{ArtifactBody, ArtifactStore};
pub use assembly::{Assembler, AssemblyOutcome};
pub use chunk_store::{compute_hash, ChunkStore};
pub use service::{UploadService, ARTIFACT_ROUTE};
pub use session::{SessionManager, SessionStore};
pub use types::*;
