//! The `ChronosDb` facade: `init`/`shutdown`, routed backend resolution,
//! and the public create/update/delete/enrich/restore/read surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chronos_blob::{BlobAdapter, FilesystemAdapter, S3Adapter, S3Settings};
use chronos_core::config::{ChronosConfig, CollectionMap};
use chronos_core::{ChronosError, ItemId, Result};
use chronos_engine::{
    BatchEnrichInput, CreateInput, CrudEngine, DeleteInput, EnrichEngine, EnrichInput, GetOptions,
    GetResult, MutationResult, Resolver, RestoreCollectionInput, RestoreCollectionResult,
    RestoreEngine, RestoreObjectInput, TierEntry, TieredLookup, TieredResult, UpdateInput,
};
use chronos_fallback::{FallbackQueue, RetryHandler, Worker};
use chronos_locks::LockManager;
use chronos_repo::{CursorPage, MetaFilter, Repository, TransactionMode};
use chronos_router::{ConnectionCache, DatabaseType, RouteContext, Router, Tier};
use dashmap::DashSet;
use mongodb::Client;
use serde_json::Value;
use tokio::sync::watch;

use crate::events::{BroadcastSink, ChronosEvent, EventSink};

/// The routed backend handle one operation needs: a doc-store repository,
/// a blob adapter, a per-item lock manager, and the collection's
/// externalization/validation map and bucket assignment.
struct Backend {
    repo: Repository,
    blob: Arc<dyn BlobAdapter>,
    locks: LockManager,
    map: CollectionMap,
    snapshot_bucket: String,
    content_bucket: String,
}

struct Inner {
    config: ChronosConfig,
    server_id: String,
    db_clients: ConnectionCache<Client>,
    space_adapters: HashMap<String, Arc<dyn BlobAdapter>>,
    local_adapter: Option<Arc<dyn BlobAdapter>>,
    ensured_indexes: DashSet<String>,
    fallback: Option<Arc<FallbackQueue>>,
    event_sink: Arc<dyn EventSink>,
    broadcast: Option<Arc<BroadcastSink>>,
    worker_cancel: Mutex<Option<watch::Sender<bool>>>,
}

/// The embedded Chronos-DB handle. Cheap to clone: every field is
/// `Arc`-backed, and the underlying document/object-store connections are
/// themselves pooled.
///
/// There is no implicit lazy reconfiguration: a running instance always
/// reflects the [`ChronosConfig`] it was opened with. Call [`ChronosDb::init`]
/// once per configuration and [`ChronosDb::shutdown`] once when done.
#[derive(Clone)]
pub struct ChronosDb {
    inner: Arc<Inner>,
}

/// Builds blob adapters for every configured `spacesConnections` entry.
///
/// The `spacesConnections` schema (`endpoint`, `region`, `credentials`,
/// optional `forcePathStyle`) mirrors [`S3Settings`] exactly, so every
/// entry resolves to an [`S3Adapter`]; Azure Blob support exists in
/// `chronos-blob` as a capability but has no selection surface in
/// [`ChronosConfig`] to route to it.
fn build_space_adapters(config: &ChronosConfig) -> HashMap<String, Arc<dyn BlobAdapter>> {
    config
        .spaces_connections
        .iter()
        .map(|(name, conn)| {
            let adapter = S3Adapter::new(S3Settings {
                endpoint: Some(conn.endpoint.clone()),
                region: conn.region.clone().unwrap_or_default(),
                access_key_id: conn.credentials.access_key_id.clone(),
                secret_access_key: conn.credentials.secret_access_key.clone(),
                force_path_style: conn.force_path_style,
            });
            (name.clone(), Arc::new(adapter) as Arc<dyn BlobAdapter>)
        })
        .collect()
}

async fn open_database(
    db_clients: &ConnectionCache<Client>,
    config: &ChronosConfig,
    db_conn_ref: &str,
    database_name: &str,
) -> Result<mongodb::Database> {
    let uri = config
        .db_connections
        .get(db_conn_ref)
        .ok_or_else(|| ChronosError::Config(format!("unknown dbConnRef {db_conn_ref}")))?
        .clone();
    let client = db_clients
        .get_or_open(db_conn_ref, || async move {
            Client::with_uri_str(&uri).await.map_err(|e| ChronosError::StorageTransient(e.to_string()))
        })
        .await?;
    Ok(client.database(database_name))
}

async fn open_fallback_queue(config: &ChronosConfig, db_clients: &ConnectionCache<Client>) -> Result<FallbackQueue> {
    let ctx = RouteContext {
        database_type: DatabaseType::Metadata,
        tier: Tier::Generic,
        tenant_id: None,
        domain: None,
        collection: "_fallback".to_string(),
        item_id: None,
        forced_backend_index: None,
    };
    let resolved = Router::resolve(&ctx, config)?;
    let database = open_database(db_clients, config, &resolved.db_conn_ref, &resolved.database).await?;
    Ok(FallbackQueue::new(database, config.fallback.clone()))
}

impl ChronosDb {
    /// Open a database instance. `server_id` identifies this process for
    /// lock ownership and is surfaced in lock-holder diagnostics. Events
    /// are published on the default in-memory broadcast sink; use
    /// [`ChronosDb::init_with_sink`] to install a custom one.
    pub async fn init(config: ChronosConfig, server_id: impl Into<String>) -> Result<Self> {
        Self::init_with_sink(config, server_id, None).await
    }

    /// Like [`ChronosDb::init`], but publishes events to `sink` instead of
    /// the default broadcast channel. Pass `None` for the default.
    ///
    /// When `config.fallback.enabled`, also opens the fallback queue
    /// (hosted in the `metadata` generic database) and starts its retry
    /// worker as a background task; [`ChronosDb::shutdown`] stops it.
    #[tracing::instrument(skip(config, server_id, sink))]
    pub async fn init_with_sink(config: ChronosConfig, server_id: impl Into<String>, sink: Option<Arc<dyn EventSink>>) -> Result<Self> {
        let server_id = server_id.into();
        let local_adapter = config
            .local_storage
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(FilesystemAdapter::new(c.base_path.clone())) as Arc<dyn BlobAdapter>);
        let space_adapters = build_space_adapters(&config);
        let db_clients = ConnectionCache::new();

        let fallback = if config.fallback.enabled {
            Some(Arc::new(open_fallback_queue(&config, &db_clients).await?))
        } else {
            None
        };

        let (event_sink, broadcast) = match sink {
            Some(s) => (s, None),
            None => {
                let b = Arc::new(BroadcastSink::default());
                (b.clone() as Arc<dyn EventSink>, Some(b))
            }
        };

        let inner = Arc::new(Inner {
            config,
            server_id,
            db_clients,
            space_adapters,
            local_adapter,
            ensured_indexes: DashSet::new(),
            fallback: fallback.clone(),
            event_sink,
            broadcast,
            worker_cancel: Mutex::new(None),
        });
        let db = ChronosDb { inner };

        if let Some(queue) = fallback {
            db.spawn_fallback_worker(queue);
        }
        Ok(db)
    }

    /// Subscribe to the default broadcast event stream. Returns `None`
    /// if a custom, non-broadcast sink was installed via
    /// [`ChronosDb::init_with_sink`].
    pub fn events(&self) -> Option<tokio::sync::broadcast::Receiver<ChronosEvent>> {
        self.inner.broadcast.as_ref().map(|sink| sink.subscribe())
    }

    fn spawn_fallback_worker(&self, queue: Arc<FallbackQueue>) {
        let handler: Arc<dyn RetryHandler> = Arc::new(self.clone());
        let worker = Worker::new(queue, handler, Duration::from_secs(5), 50);
        let (tx, rx) = watch::channel(false);
        *self.inner.worker_cancel.lock().expect("worker_cancel mutex poisoned") = Some(tx);
        tokio::spawn(async move { worker.run(rx).await });
    }

    /// Stop the fallback worker, if one is running. Idempotent.
    pub fn shutdown(&self) {
        if let Some(tx) = self.inner.worker_cancel.lock().expect("worker_cancel mutex poisoned").take() {
            let _ = tx.send(true);
        }
    }

    async fn backend_for(&self, ctx: &RouteContext, collection: &str) -> Result<Backend> {
        let resolved = Router::resolve(ctx, &self.inner.config)?;
        let database = open_database(&self.inner.db_clients, &self.inner.config, &resolved.db_conn_ref, &resolved.database).await?;
        let repo = Repository::new(database, collection);

        let map = self
            .inner
            .config
            .collection_maps
            .get(collection)
            .cloned()
            .unwrap_or_default();

        let index_key = format!("{}/{collection}", resolved.database);
        if self.inner.ensured_indexes.insert(index_key) {
            repo.ensure_indexes(&map.indexed_props).await?;
        }

        let blob = match &self.inner.local_adapter {
            Some(local) => local.clone(),
            None => self
                .inner
                .space_adapters
                .get(&resolved.space_conn_ref)
                .cloned()
                .ok_or_else(|| ChronosError::Config(format!("unknown spaceConnRef {}", resolved.space_conn_ref)))?,
        };

        let snapshot_bucket = resolved
            .buckets
            .records()
            .ok_or_else(|| ChronosError::Config(format!("no records bucket configured for {collection}")))?
            .to_string();
        let content_bucket = resolved
            .buckets
            .content()
            .ok_or_else(|| ChronosError::Config(format!("no content bucket configured for {collection}")))?
            .to_string();

        let locks = LockManager::new(repo.clone(), self.inner.server_id.clone());

        Ok(Backend {
            repo,
            blob,
            locks,
            map,
            snapshot_bucket,
            content_bucket,
        })
    }

    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::from_config(&self.inner.config.transactions)
    }

    fn crud_engine(&self, backend: Backend, collection: impl Into<String>) -> CrudEngine {
        CrudEngine::new(
            backend.repo,
            backend.blob,
            backend.locks,
            collection,
            backend.map,
            backend.snapshot_bucket,
            backend.content_bucket,
            self.inner.config.versioning.enabled,
            self.inner.config.logical_delete.enabled,
            self.inner.config.dev_shadow.clone(),
            self.transaction_mode(),
        )
    }

    fn enrich_engine(&self, backend: Backend, collection: impl Into<String>) -> EnrichEngine {
        EnrichEngine::new(
            backend.repo,
            backend.blob,
            backend.locks,
            collection,
            backend.map,
            backend.snapshot_bucket,
            backend.content_bucket,
            self.inner.config.versioning.enabled,
            self.inner.config.dev_shadow.clone(),
            self.transaction_mode(),
        )
    }

    /// Enqueue a just-failed mutation onto the fallback queue, if
    /// `fallback.enabled` and the failure is a plausible retry candidate.
    /// Returns the original error either way, so callers propagate it
    /// regardless of whether a retry was scheduled.
    async fn maybe_fallback(
        &self,
        operation: &str,
        ctx: &RouteContext,
        collection: &str,
        item_id: ItemId,
        payload: Value,
        expected_ov: Option<u64>,
        err: ChronosError,
    ) -> ChronosError {
        if !err.is_fallback_candidate() {
            return err;
        }
        let Some(queue) = &self.inner.fallback else {
            return err;
        };
        let route_context = match serde_json::to_value(ctx) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize route context for fallback enqueue");
                return err;
            }
        };
        if let Err(enqueue_err) = queue
            .enqueue(operation, collection, item_id, route_context, payload, expected_ov, err.to_string())
            .await
        {
            tracing::error!(error = %enqueue_err, operation, collection = %collection, item_id = %item_id, "failed to enqueue fallback operation");
        }
        err
    }

    /// Create a new item in `collection`, routed by `ctx`.
    #[tracing::instrument(skip(self, input), fields(op = "create", collection))]
    pub async fn create(&self, ctx: RouteContext, collection: impl Into<String>, input: CreateInput) -> Result<MutationResult> {
        let collection = collection.into();
        let item_id = input.id.unwrap_or_else(ItemId::new);
        let payload = input.payload.clone();
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = self.crud_engine(backend, collection.clone());
        let input = CreateInput { id: Some(item_id), ..input };
        match engine.create(input).await {
            Ok(result) => {
                self.inner.event_sink.emit(ChronosEvent::Created {
                    collection,
                    item_id: result.id,
                    ov: result.ov,
                    cv: result.cv,
                });
                Ok(result)
            }
            Err(e) => Err(self.maybe_fallback("create", &ctx, &collection, item_id, payload, None, e).await),
        }
    }

    /// Replace an item's payload wholesale.
    #[tracing::instrument(skip(self, input), fields(op = "update", collection))]
    pub async fn update(&self, ctx: RouteContext, collection: impl Into<String>, input: UpdateInput) -> Result<MutationResult> {
        let collection = collection.into();
        let item_id = input.id;
        let payload = input.payload.clone();
        let expected_ov = input.expected_ov;
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = self.crud_engine(backend, collection.clone());
        match engine.update(input).await {
            Ok(result) => {
                self.inner.event_sink.emit(ChronosEvent::Updated {
                    collection,
                    item_id: result.id,
                    ov: result.ov,
                    cv: result.cv,
                });
                Ok(result)
            }
            Err(e) => Err(self.maybe_fallback("update", &ctx, &collection, item_id, payload, expected_ov, e).await),
        }
    }

    /// Delete an item (logical tombstone or hard delete, per
    /// `logicalDelete.enabled`).
    #[tracing::instrument(skip(self, input), fields(op = "delete", collection))]
    pub async fn delete(&self, ctx: RouteContext, collection: impl Into<String>, input: DeleteInput) -> Result<MutationResult> {
        let collection = collection.into();
        let item_id = input.id;
        let expected_ov = input.expected_ov;
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = self.crud_engine(backend, collection.clone());
        match engine.delete(input).await {
            Ok(result) => {
                self.inner.event_sink.emit(ChronosEvent::Deleted {
                    collection,
                    item_id: result.id,
                    ov: if self.inner.config.logical_delete.enabled { Some(result.ov) } else { None },
                });
                Ok(result)
            }
            Err(e) => Err(self.maybe_fallback("delete", &ctx, &collection, item_id, Value::Null, expected_ov, e).await),
        }
    }

    /// Deep-merge a single patch into an item's current snapshot.
    #[tracing::instrument(skip(self, input), fields(op = "enrich", collection))]
    pub async fn enrich(&self, ctx: RouteContext, collection: impl Into<String>, input: EnrichInput) -> Result<MutationResult> {
        let collection = collection.into();
        let item_id = input.id;
        let patch = input.patch.clone();
        let function_id = input.function_id.clone();
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = self.enrich_engine(backend, collection.clone());
        match engine.enrich(input).await {
            Ok(result) => {
                self.inner.event_sink.emit(ChronosEvent::Enriched {
                    collection,
                    item_id: result.id,
                    ov: result.ov,
                    cv: result.cv,
                    function_ids: function_id.into_iter().collect(),
                });
                Ok(result)
            }
            Err(e) => Err(self.maybe_fallback("enrich", &ctx, &collection, item_id, patch, None, e).await),
        }
    }

    /// Deep-merge a batch of patches as a single new version.
    #[tracing::instrument(skip(self, input), fields(op = "batch_enrich", collection))]
    pub async fn batch_enrich(
        &self,
        ctx: RouteContext,
        collection: impl Into<String>,
        input: BatchEnrichInput,
    ) -> Result<MutationResult> {
        let collection = collection.into();
        let item_id = input.id;
        let function_ids = input.function_ids.clone();
        let payload = serde_json::json!({ "patches": input.patches.clone(), "functionIds": input.function_ids.clone() });
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = self.enrich_engine(backend, collection.clone());
        match engine.batch_enrich(input).await {
            Ok(result) => {
                self.inner.event_sink.emit(ChronosEvent::Enriched {
                    collection,
                    item_id: result.id,
                    ov: result.ov,
                    cv: result.cv,
                    function_ids,
                });
                Ok(result)
            }
            Err(e) => Err(self.maybe_fallback("batch_enrich", &ctx, &collection, item_id, payload, None, e).await),
        }
    }

    /// Restore a single item to a prior version or instant.
    #[tracing::instrument(skip(self, input), fields(op = "restore_object", collection))]
    pub async fn restore_object(
        &self,
        ctx: RouteContext,
        collection: impl Into<String>,
        input: RestoreObjectInput,
    ) -> Result<MutationResult> {
        let collection = collection.into();
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = RestoreEngine::new(backend.repo, backend.locks, self.transaction_mode());
        let result = engine.restore_object(input).await?;
        self.inner.event_sink.emit(ChronosEvent::Restored {
            collection,
            item_id: result.id,
            ov: result.ov,
            cv: result.cv,
        });
        Ok(result)
    }

    /// Restore every item in a collection to a target collection version
    /// (or the instant that resolves to one).
    #[tracing::instrument(skip(self, input), fields(op = "restore_collection", collection))]
    pub async fn restore_collection(
        &self,
        ctx: RouteContext,
        collection: impl Into<String>,
        input: RestoreCollectionInput,
    ) -> Result<RestoreCollectionResult> {
        let collection = collection.into();
        let dry_run = input.dry_run;
        let backend = self.backend_for(&ctx, &collection).await?;
        let engine = RestoreEngine::new(backend.repo, backend.locks, self.transaction_mode());
        let result = engine.restore_collection(input).await?;
        if !dry_run {
            for applied in &result.applied {
                self.inner.event_sink.emit(ChronosEvent::Restored {
                    collection: collection.clone(),
                    item_id: applied.id,
                    ov: applied.ov,
                    cv: applied.cv,
                });
            }
        }
        Ok(result)
    }

    /// Read a single item (latest head, a specific `ov`, or as-of an instant).
    #[tracing::instrument(skip(self, options), fields(op = "get_item", collection))]
    pub async fn get_item(
        &self,
        ctx: RouteContext,
        collection: impl Into<String>,
        id: ItemId,
        options: GetOptions,
    ) -> Result<Option<GetResult>> {
        let collection = collection.into();
        let backend = self.backend_for(&ctx, &collection).await?;
        let resolver = Resolver::new(backend.repo, backend.blob);
        resolver.get_item(&id, &options).await
    }

    /// List item ids matching a `metaIndexed.*` filter.
    #[tracing::instrument(skip(self, filters), fields(op = "list_by_metadata", collection))]
    pub async fn list_by_metadata(
        &self,
        ctx: RouteContext,
        collection: impl Into<String>,
        filters: &[MetaFilter],
        page: CursorPage,
        include_deleted: bool,
    ) -> Result<Vec<ItemId>> {
        let collection = collection.into();
        let backend = self.backend_for(&ctx, &collection).await?;
        let resolver = Resolver::new(backend.repo, backend.blob);
        resolver.list_by_metadata(filters, &page, include_deleted).await
    }

    /// Tiered knowledge lookup: resolves generic/domain/tenant routes for
    /// `collection` and reads across them, merging (tenant wins
    /// conflicts) or returning the first match, per `merge`.
    #[tracing::instrument(skip(self, options), fields(op = "get_knowledge", collection))]
    pub async fn get_knowledge(
        &self,
        collection: impl Into<String>,
        tenant_id: Option<String>,
        domain: Option<String>,
        id: ItemId,
        merge: bool,
        options: GetOptions,
    ) -> Result<Option<TieredResult>> {
        let collection = collection.into();
        let mut tiers = Vec::new();

        let generic_ctx = RouteContext {
            database_type: DatabaseType::Knowledge,
            tier: Tier::Generic,
            tenant_id: None,
            domain: None,
            collection: collection.clone(),
            item_id: Some(id),
            forced_backend_index: None,
        };
        let backend = self.backend_for(&generic_ctx, &collection).await?;
        tiers.push(TierEntry {
            label: "generic".to_string(),
            resolver: Resolver::new(backend.repo, backend.blob),
        });

        if let Some(domain) = domain {
            let domain_ctx = RouteContext {
                database_type: DatabaseType::Knowledge,
                tier: Tier::Domain,
                tenant_id: None,
                domain: Some(domain),
                collection: collection.clone(),
                item_id: Some(id),
                forced_backend_index: None,
            };
            let backend = self.backend_for(&domain_ctx, &collection).await?;
            tiers.push(TierEntry {
                label: "domain".to_string(),
                resolver: Resolver::new(backend.repo, backend.blob),
            });
        }

        if let Some(tenant_id) = tenant_id {
            let tenant_ctx = RouteContext {
                database_type: DatabaseType::Knowledge,
                tier: Tier::Tenant,
                tenant_id: Some(tenant_id),
                domain: None,
                collection: collection.clone(),
                item_id: Some(id),
                forced_backend_index: None,
            };
            let backend = self.backend_for(&tenant_ctx, &collection).await?;
            tiers.push(TierEntry {
                label: "tenant".to_string(),
                resolver: Resolver::new(backend.repo, backend.blob),
            });
        }

        let lookup = TieredLookup { tiers };
        lookup.resolve(&id, merge, &options).await
    }
}
