//! Uniform capability set over S3-compatible, Azure Blob, and local
//! filesystem backends.

pub mod adapter;
pub mod azure;
pub mod error;
pub mod filesystem;
pub mod s3;

#[cfg(test)]
mod memory;

pub use adapter::{BlobAdapter, HeadResult, ListPage, PutResult};
pub use azure::{AzureAdapter, AzureSettings};
pub use error::BlobError;
pub use filesystem::FilesystemAdapter;
pub use s3::{S3Adapter, S3Settings};

#[cfg(test)]
pub use memory::InMemoryAdapter;
