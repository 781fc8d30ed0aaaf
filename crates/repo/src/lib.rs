//! Typed access to `_head`, `_ver`, `_counter`, and `_locks` collections,
//! plus idempotent index management and safe metadata filter construction.

#![warn(missing_docs)]

pub mod collections;
pub mod error;
pub mod filter;
pub mod indexes;
pub mod repository;

pub use filter::{CursorPage, MetaFilter, MetaOp};
pub use repository::{Repository, TransactionMode};
