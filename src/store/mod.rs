//! Persisted corpus storage

pub mod fs;

pub use fs::{FilesystemChunkQuery, FilesystemChunkStore};
