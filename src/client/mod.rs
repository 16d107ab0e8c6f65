//! Upload Client
//!
//! Sending side of the protocol: plan a file into chunks, fingerprint it on a
//! background worker, negotiate with the server and transfer only the chunks
//! it still needs.

pub mod driver;
pub mod fingerprint;
pub mod plan;
pub mod transport;

pub use driver::{DriverEvent, DriverOptions, DriverState, UploadDriver, UploadReport};
pub use fingerprint::{
    chunk_id, fingerprint_bytes, fingerprint_file, ChunkDescriptor, FileFingerprint,
    FingerprintError, FingerprintEvent, FingerprintTask,
};
pub use plan::{ChunkPlan, ChunkRange};
pub use transport::{ClientError, HttpTransport, LocalTransport, UploadTransport};
