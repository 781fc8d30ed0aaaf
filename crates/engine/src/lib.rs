//! Mutation and read engines: CRUD (create/update/delete), enrich
//! (deep-merge), restore (version/timestamp-targeted, append-only), and
//! the tiered read resolver.

#![warn(missing_docs)]

pub mod crud;
pub mod enrich;
pub mod resolver;
pub mod restore;
mod util;

pub use crud::{CreateInput, CrudEngine, DeleteInput, MutationResult, UpdateInput};
pub use enrich::{BatchEnrichInput, EnrichEngine, EnrichInput};
pub use resolver::{GetOptions, GetResult, ItemMeta, Resolver, TierEntry, TieredLookup, TieredResult};
pub use restore::{RestoreCollectionInput, RestoreCollectionResult, RestoreEngine, RestoreObjectInput, RestoreTarget};
