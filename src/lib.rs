//! Chunkvault Server Library
//!
//! Resumable, content-addressed chunked uploads.
//!
//! # Modules
//!
//! - `client`: Chunk planning, fingerprinting and the upload driver
//! - `upload`: Server-side sessions, handshake, chunk ingestion and assembly
//! - `db`: SQLite persistence for upload sessions
//! - `routes`: HTTP endpoints

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload;
