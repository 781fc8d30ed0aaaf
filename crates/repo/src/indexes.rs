//! Idempotent index management: `create_index`/`create_indexes` on an
//! existing key pattern is a no-op against a live server, so ensuring
//! indexes can safely run on every open rather than only on first use.

use bson::{doc, Document};
use chronos_core::ChronosError;
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};

use crate::collections::{counter_name, head_name, locks_name, ver_name};
use crate::error::classify;

fn unique_index(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .unique(true)
                .name(Some(name.to_string()))
                .build(),
        )
        .build()
}

fn plain_index(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().name(Some(name.to_string())).build())
        .build()
}

/// Ensure every index the repository layer depends on exists for
/// `collection`. `indexed_props` are the configured `metaIndexed` dot-paths
/// that additionally get a partial, existence-filtered index on `_head`.
pub async fn ensure_indexes(
    db: &Database,
    collection: &str,
    indexed_props: &[String],
) -> Result<(), ChronosError> {
    ensure_head_indexes(db, collection, indexed_props).await?;
    ensure_ver_indexes(db, collection).await?;
    ensure_counter_indexes(db, collection).await?;
    ensure_locks_indexes(db, collection).await?;
    Ok(())
}

async fn ensure_head_indexes(
    db: &Database,
    collection: &str,
    indexed_props: &[String],
) -> Result<(), ChronosError> {
    let coll = db.collection::<Document>(&head_name(collection));
    let mut models = vec![
        unique_index(doc! { "itemId": 1 }, "uniq_item_id"),
        plain_index(doc! { "ov": 1 }, "ov"),
        plain_index(doc! { "cv": 1 }, "cv"),
        plain_index(doc! { "updatedAt": 1 }, "updated_at"),
        plain_index(doc! { "deletedAt": 1 }, "deleted_at"),
    ];
    for prop in indexed_props {
        let path = format!("metaIndexed.{prop}");
        let name = format!("meta_{}", prop.replace(['.', '[', ']'], "_"));
        let options = IndexOptions::builder()
            .name(Some(name))
            .partial_filter_expression(doc! { path.clone(): { "$exists": true } })
            .build();
        models.push(
            IndexModel::builder()
                .keys(doc! { path: 1 })
                .options(options)
                .build(),
        );
    }
    coll.create_indexes(models)
        .await
        .map_err(|e| classify("ensure_head_indexes", e))?;
    Ok(())
}

async fn ensure_ver_indexes(db: &Database, collection: &str) -> Result<(), ChronosError> {
    let coll = db.collection::<Document>(&ver_name(collection));
    let models = vec![
        plain_index(doc! { "itemId": 1, "ov": -1 }, "item_ov_desc"),
        plain_index(doc! { "ov": 1 }, "ov"),
        plain_index(doc! { "cv": 1 }, "cv"),
        plain_index(doc! { "at": 1 }, "at"),
        plain_index(doc! { "op": 1 }, "op"),
        plain_index(doc! { "at": -1, "ov": -1 }, "at_desc_ov_desc"),
    ];
    coll.create_indexes(models)
        .await
        .map_err(|e| classify("ensure_ver_indexes", e))?;
    Ok(())
}

async fn ensure_counter_indexes(db: &Database, collection: &str) -> Result<(), ChronosError> {
    let coll = db.collection::<Document>(&counter_name(collection));
    let models = vec![unique_index(doc! { "_id": 1 }, "uniq_id")];
    coll.create_indexes(models)
        .await
        .map_err(|e| classify("ensure_counter_indexes", e))?;
    Ok(())
}

async fn ensure_locks_indexes(db: &Database, collection: &str) -> Result<(), ChronosError> {
    let coll = db.collection::<Document>(&locks_name(collection));
    let ttl_options = IndexOptions::builder()
        .name(Some("ttl_expires_at".to_string()))
        .expire_after(std::time::Duration::from_secs(0))
        .build();
    let models = vec![
        unique_index(doc! { "itemId": 1 }, "uniq_item_id"),
        IndexModel::builder()
            .keys(doc! { "expiresAt": 1 })
            .options(ttl_options)
            .build(),
        plain_index(doc! { "serverId": 1 }, "server_id"),
        plain_index(doc! { "serverId": 1, "expiresAt": 1 }, "server_id_expires_at"),
    ];
    coll.create_indexes(models)
        .await
        .map_err(|e| classify("ensure_locks_indexes", e))?;
    Ok(())
}
