//! Durable storage: document/chunk metadata and raw file blobs

pub mod blob;
pub mod metadata;

pub use blob::{document_key, BlobStore, FsBlobStore};
pub use metadata::{MetadataStore, PgMetadataStore};
