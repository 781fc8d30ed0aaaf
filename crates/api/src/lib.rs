//! The embedded Chronos-DB facade: open/close a configured instance,
//! run create/update/delete/enrich/restore/read operations against it,
//! and subscribe to the event stream they emit.

#![warn(missing_docs)]

mod db;
pub mod events;
mod retry;

pub use chronos_engine::{
    BatchEnrichInput, CreateInput, DeleteInput, EnrichInput, GetOptions, GetResult, ItemMeta,
    MutationResult, RestoreCollectionInput, RestoreCollectionResult, RestoreObjectInput,
    RestoreTarget, TieredResult,
};
pub use chronos_repo::{CursorPage, MetaFilter};
pub use chronos_router::{DatabaseType, RouteContext, Tier};

pub use db::ChronosDb;
pub use events::{BroadcastSink, ChronosEvent, EventSink};
