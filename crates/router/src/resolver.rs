//! Resolves a [`RouteContext`] against a [`chronos_core::config::ChronosConfig`]
//! into a concrete connection-reference tuple.

use chronos_core::config::{BucketSet, ChronosConfig, DatabaseEntry, HashAlgo};
use chronos_core::ChronosError;

use crate::context::{DatabaseType, RouteContext, Tier};
use crate::hash::{JumpHasher, RendezvousHasher, RouteHasher};

/// The concrete backends and bucket assignment selected for one operation.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Key into `dbConnections`.
    pub db_conn_ref: String,
    /// Key into `spacesConnections`.
    pub space_conn_ref: String,
    /// Logical document-store database name.
    pub database: String,
    /// Bucket assignment for this route.
    pub buckets: BucketSet,
    /// Index chosen among the candidate set (0 when there was only one).
    pub chosen_index: usize,
    /// Number of candidates the route was chosen among.
    pub candidate_count: usize,
}

/// Stateless route resolution over a loaded configuration.
pub struct Router;

impl Router {
    /// Resolve `ctx` against `config`.
    ///
    /// Multiple entries may share the same `tenant_id`/`domain` to express
    /// horizontal sharding; when more than one candidate matches, one is
    /// selected deterministically via [`RoutingConfig::hash_algo`], unless
    /// `ctx.forced_backend_index` overrides the choice.
    pub fn resolve(ctx: &RouteContext, config: &ChronosConfig) -> Result<ResolvedRoute, ChronosError> {
        ctx.validate()?;
        let candidates = Self::candidates(ctx, config)?;
        if candidates.is_empty() {
            return Err(ChronosError::RouteMismatch(format!(
                "no database entry configured for {:?}/{:?}",
                ctx.database_type, ctx.tier
            )));
        }

        let index = match ctx.forced_backend_index {
            Some(i) if i < candidates.len() => i,
            Some(i) => {
                return Err(ChronosError::RouteMismatch(format!(
                    "forced_backend_index {i} out of range for {} candidates",
                    candidates.len()
                )))
            }
            None if candidates.len() == 1 => 0,
            None => {
                let entry = candidates[0];
                let key = Self::routing_key(ctx, config, &entry.db_name);
                let hasher: &dyn RouteHasher = match config.routing.hash_algo {
                    HashAlgo::Rendezvous => &RendezvousHasher,
                    HashAlgo::Jump => &JumpHasher,
                };
                hasher.choose(&key, candidates.len())
            }
        };

        let chosen = candidates[index];
        Ok(ResolvedRoute {
            db_conn_ref: chosen.db_conn_ref.clone(),
            space_conn_ref: chosen.space_conn_ref.clone(),
            database: chosen.db_name.clone(),
            buckets: chosen.buckets.clone(),
            chosen_index: index,
            candidate_count: candidates.len(),
        })
    }

    fn routing_key(ctx: &RouteContext, config: &ChronosConfig, db_name: &str) -> String {
        match &config.routing.choose_key {
            Some(template) => template
                .replace("{tenantId}", ctx.tenant_id.as_deref().unwrap_or(""))
                .replace("{dbName}", db_name)
                .replace("{collection}", &ctx.collection)
                .replace(
                    "{itemId}",
                    &ctx.item_id.map(|id| id.to_string()).unwrap_or_default(),
                ),
            None => ctx.default_routing_key(db_name),
        }
    }

    fn candidates<'a>(
        ctx: &RouteContext,
        config: &'a ChronosConfig,
    ) -> Result<Vec<&'a DatabaseEntry>, ChronosError> {
        let family = match ctx.database_type {
            DatabaseType::Metadata => Some(&config.metadata),
            DatabaseType::Knowledge => Some(&config.knowledge),
            DatabaseType::Runtime => None,
            DatabaseType::Logs => {
                return Ok(vec![&config.logs.entry]);
            }
            DatabaseType::Messaging => {
                return Ok(vec![&config.messaging.entry]);
            }
            DatabaseType::Identities => {
                return Ok(vec![&config.identities.entry]);
            }
        };

        if ctx.database_type == DatabaseType::Runtime {
            let tenant_id = ctx.tenant_id.as_deref().unwrap_or("");
            return Ok(config
                .runtime
                .tenant_databases
                .iter()
                .filter(|e| e.tenant_id == tenant_id)
                .map(|e| &e.entry)
                .collect());
        }

        let family = family.expect("non-runtime database types carry a family");
        match ctx.tier {
            Tier::Generic => Ok(vec![&family.generic_database]),
            Tier::Domain => {
                let domain = ctx.domain.as_deref().unwrap_or("");
                Ok(family
                    .domains_databases
                    .iter()
                    .filter(|e| e.domain == domain)
                    .map(|e| &e.entry)
                    .collect())
            }
            Tier::Tenant => {
                let tenant_id = ctx.tenant_id.as_deref().unwrap_or("");
                Ok(family
                    .tenant_databases
                    .iter()
                    .filter(|e| e.tenant_id == tenant_id)
                    .map(|e| &e.entry)
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronos_core::config::*;
    use std::collections::HashMap;

    fn entry(name: &str) -> DatabaseEntry {
        DatabaseEntry {
            db_conn_ref: format!("{name}-doc"),
            space_conn_ref: format!("{name}-blob"),
            db_name: name.to_string(),
            buckets: BucketSet::default(),
        }
    }

    fn base_config() -> ChronosConfig {
        ChronosConfig {
            db_connections: HashMap::new(),
            spaces_connections: HashMap::new(),
            metadata: DatabaseFamily {
                generic_database: entry("metadata-generic"),
                domains_databases: vec![],
                tenant_databases: vec![],
            },
            knowledge: DatabaseFamily {
                generic_database: entry("knowledge-generic"),
                domains_databases: vec![DomainDatabaseEntry {
                    domain: "sales".to_string(),
                    entry: entry("knowledge-sales"),
                }],
                tenant_databases: vec![
                    TenantDatabaseEntry {
                        tenant_id: "acme".to_string(),
                        entry: entry("knowledge-acme-1"),
                    },
                    TenantDatabaseEntry {
                        tenant_id: "acme".to_string(),
                        entry: entry("knowledge-acme-2"),
                    },
                ],
            },
            runtime: RuntimeFamily {
                tenant_databases: vec![],
            },
            logs: FlatDatabase { entry: entry("logs") },
            messaging: FlatDatabase {
                entry: entry("messaging"),
            },
            identities: FlatDatabase {
                entry: entry("identities"),
            },
            local_storage: None,
            routing: RoutingConfig::default(),
            retention: RetentionConfig::default(),
            rollup: RollupConfig::default(),
            collection_maps: HashMap::new(),
            counter_rules: vec![],
            time_based_rules: vec![],
            cross_tenant_rules: vec![],
            dev_shadow: DevShadowConfig::default(),
            logical_delete: LogicalDeleteConfig::default(),
            versioning: VersioningConfig::default(),
            transactions: TransactionsConfig::default(),
            fallback: FallbackConfig::default(),
            write_optimization: WriteOptimizationConfig::default(),
        }
    }

    fn ctx(database_type: DatabaseType, tier: Tier) -> RouteContext {
        RouteContext {
            database_type,
            tier,
            tenant_id: None,
            domain: None,
            collection: "docs".to_string(),
            item_id: None,
            forced_backend_index: None,
        }
    }

    #[test]
    fn generic_tier_resolves_single_candidate() {
        let config = base_config();
        let route = Router::resolve(&ctx(DatabaseType::Metadata, Tier::Generic), &config).unwrap();
        assert_eq!(route.database, "metadata-generic");
        assert_eq!(route.candidate_count, 1);
    }

    #[test]
    fn domain_tier_resolves_matching_domain() {
        let config = base_config();
        let mut c = ctx(DatabaseType::Knowledge, Tier::Domain);
        c.domain = Some("sales".to_string());
        let route = Router::resolve(&c, &config).unwrap();
        assert_eq!(route.database, "knowledge-sales");
    }

    #[test]
    fn unknown_domain_is_route_mismatch() {
        let config = base_config();
        let mut c = ctx(DatabaseType::Knowledge, Tier::Domain);
        c.domain = Some("unknown".to_string());
        assert!(Router::resolve(&c, &config).is_err());
    }

    #[test]
    fn multiple_tenant_shards_are_hashed_deterministically() {
        let config = base_config();
        let mut c = ctx(DatabaseType::Knowledge, Tier::Tenant);
        c.tenant_id = Some("acme".to_string());
        let first = Router::resolve(&c, &config).unwrap();
        let second = Router::resolve(&c, &config).unwrap();
        assert_eq!(first.database, second.database);
        assert_eq!(first.candidate_count, 2);
    }

    #[test]
    fn forced_backend_index_bypasses_hashing() {
        let config = base_config();
        let mut c = ctx(DatabaseType::Knowledge, Tier::Tenant);
        c.tenant_id = Some("acme".to_string());
        c.forced_backend_index = Some(1);
        let route = Router::resolve(&c, &config).unwrap();
        assert_eq!(route.database, "knowledge-acme-2");
    }

    #[test]
    fn out_of_range_forced_index_errors() {
        let config = base_config();
        let mut c = ctx(DatabaseType::Knowledge, Tier::Tenant);
        c.tenant_id = Some("acme".to_string());
        c.forced_backend_index = Some(9);
        assert!(Router::resolve(&c, &config).is_err());
    }
}
