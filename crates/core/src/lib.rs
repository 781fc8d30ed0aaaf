//! Data model, error taxonomy, key layout, and configuration types shared by
//! every Chronos-DB crate.
//!
//! This crate has no dependency on any concrete document-store or
//! blob-store driver: it only defines the shapes the rest of the workspace
//! agrees on — the data model, key layout, configuration surface, and
//! error taxonomy.

#![warn(missing_docs)]

pub mod canonical;
pub mod config;
pub mod error;
pub mod ids;
pub mod key;
pub mod merge;
pub mod model;

pub use config::{Base64PropertySpec, ChronosConfig, CollectionMap};
pub use error::{ChronosError, Result};
pub use ids::ItemId;
pub use key::KeyBuilder;
pub use model::{
    BlobPointer, CollectionCounter, FallbackOperation, FallbackStatus, HeadRecord, Lineage, Op,
    SystemEnvelope, SystemState, TransactionLock, VersionRecord,
};
