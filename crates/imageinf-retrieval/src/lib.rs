//! imageinf Retrieval
//!
//! Resolves `(system, path)` file references to decoded images for the
//! inference pipeline:
//! - [`RemoteFiles`] downloads bytes from the tenant's files service
//! - [`FileCache`] keeps them on disk with atomic writes
//! - [`CachingRetriever`] combines both and decodes, extracting EXIF metadata

pub mod cache;
pub mod metadata;
pub mod remote;
pub mod retriever;

pub use cache::FileCache;
pub use metadata::extract_metadata;
pub use remote::{RemoteFiles, TapisFilesClient, TOKEN_HEADER};
pub use retriever::{CachingRetriever, ImageRetriever, RetrievedImage};
