//! # Chronos-DB
//!
//! A versioned, multi-backend persistence layer coupling a MongoDB-family
//! document store (heads, version history, locks, fallback queue) with an
//! S3-compatible/Azure/local-filesystem object store (snapshot and
//! externalized-content blobs).
//!
//! # Quick Start
//!
//! ```no_run
//! use chronos_api::{ChronosDb, CreateInput, DatabaseType, RouteContext, Tier};
//! use chronos_core::config::ChronosConfig;
//! use serde_json::json;
//!
//! # async fn run(config: ChronosConfig) -> chronos_core::Result<()> {
//! let db = ChronosDb::init(config, "server-1").await?;
//!
//! let ctx = RouteContext {
//!     database_type: DatabaseType::Knowledge,
//!     tier: Tier::Generic,
//!     tenant_id: None,
//!     domain: None,
//!     collection: "documents".to_string(),
//!     item_id: None,
//!     forced_backend_index: None,
//! };
//!
//! let created = db
//!     .create(ctx, "documents", CreateInput {
//!         payload: json!({"title": "hello"}),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("created {} at ov {}", created.id, created.ov);
//!
//! db.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! [`ChronosDb`] is the single entry point: it resolves every operation's
//! routed backends via [`chronos_router`], runs the CRUD/Enrich/Restore state
//! machines in [`chronos_engine`], and dispatches transiently-failed
//! mutations onto the [`chronos_fallback`] retry queue. Internal crates
//! (core, blob, router, repo, locks, externalize, engine, fallback) are not
//! re-exported in full; only the facade surface re-exported here is stable.

pub use chronos_api::*;
