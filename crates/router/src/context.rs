//! The routing context callers provide and the tier vocabulary it is
//! resolved against.

use chronos_core::ItemId;
use serde::{Deserialize, Serialize};

/// Selects the tier family a routing context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    /// Small searchable projections alongside the authoritative blob payload.
    Metadata,
    /// Tiered generic/domain/tenant knowledge records.
    Knowledge,
    /// Per-tenant runtime/application data. Only the `tenant` tier applies.
    Runtime,
    /// Flat, single-tier operational log store.
    Logs,
    /// Flat, single-tier messaging store.
    Messaging,
    /// Flat, single-tier identity store.
    Identities,
}

/// Scope within a [`DatabaseType`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Shared across all tenants and domains.
    Generic,
    /// Scoped to a named domain.
    Domain,
    /// Scoped to a single tenant.
    Tenant,
}

/// The routing inputs a caller supplies for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteContext {
    /// Tier family to resolve within.
    pub database_type: DatabaseType,
    /// Scope within the family. `Runtime` only accepts `Tenant`.
    pub tier: Tier,
    /// Required when `tier == Tenant`.
    pub tenant_id: Option<String>,
    /// Required when `tier == Domain`.
    pub domain: Option<String>,
    /// Target collection, used to derive the default hashing key.
    pub collection: String,
    /// Target item, used to derive the default hashing key.
    pub item_id: Option<ItemId>,
    /// Administrative override that bypasses hashing and selects a specific
    /// candidate connection pair by index.
    pub forced_backend_index: Option<usize>,
}

impl RouteContext {
    /// Build the default routing key: `tenantId|dbName|collection:itemId`,
    /// omitting absent segments.
    pub fn default_routing_key(&self, db_name: &str) -> String {
        let tenant = self.tenant_id.as_deref().unwrap_or("");
        let item = self
            .item_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        format!("{tenant}|{db_name}|{}:{item}", self.collection)
    }

    /// Validate tier/field combinations: `runtime` only accepts `tenant`,
    /// and the tier in use must carry its required scoping field.
    pub fn validate(&self) -> Result<(), chronos_core::ChronosError> {
        if matches!(self.database_type, DatabaseType::Runtime) && self.tier != Tier::Tenant {
            return Err(chronos_core::ChronosError::RouteMismatch(
                "runtime database type only accepts the tenant tier".to_string(),
            ));
        }
        if self.tier == Tier::Tenant && self.tenant_id.is_none() {
            return Err(chronos_core::ChronosError::RouteMismatch(
                "tenant tier requires tenant_id".to_string(),
            ));
        }
        if self.tier == Tier::Domain && self.domain.is_none() {
            return Err(chronos_core::ChronosError::RouteMismatch(
                "domain tier requires domain".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> RouteContext {
        RouteContext {
            database_type: DatabaseType::Knowledge,
            tier: Tier::Generic,
            tenant_id: None,
            domain: None,
            collection: "docs".to_string(),
            item_id: None,
            forced_backend_index: None,
        }
    }

    #[test]
    fn runtime_requires_tenant_tier() {
        let mut ctx = base_ctx();
        ctx.database_type = DatabaseType::Runtime;
        ctx.tier = Tier::Generic;
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn tenant_tier_requires_tenant_id() {
        let mut ctx = base_ctx();
        ctx.tier = Tier::Tenant;
        assert!(ctx.validate().is_err());
        ctx.tenant_id = Some("t1".to_string());
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn domain_tier_requires_domain() {
        let mut ctx = base_ctx();
        ctx.tier = Tier::Domain;
        assert!(ctx.validate().is_err());
        ctx.domain = Some("sales".to_string());
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn default_routing_key_omits_absent_segments() {
        let ctx = base_ctx();
        assert_eq!(ctx.default_routing_key("db"), "|db|docs:");
    }
}
