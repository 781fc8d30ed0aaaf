//! Safe metadata filter construction: only a fixed operator set over
//! `metaIndexed.*` paths is accepted, so callers can't smuggle arbitrary
//! Mongo query operators through a filter field.

use bson::{doc, Bson, Document};
use chronos_core::ChronosError;
use serde_json::Value;

/// Operators accepted against an indexed metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Set membership.
    In,
    /// Set non-membership.
    Nin,
    /// Field presence.
    Exists,
    /// Greater-than.
    Gt,
    /// Greater-than-or-equal.
    Gte,
    /// Less-than.
    Lt,
    /// Less-than-or-equal.
    Lte,
    /// Regular-expression match.
    Regex,
}

impl MetaOp {
    fn mongo_op(self) -> &'static str {
        match self {
            MetaOp::Eq => "$eq",
            MetaOp::Ne => "$ne",
            MetaOp::In => "$in",
            MetaOp::Nin => "$nin",
            MetaOp::Exists => "$exists",
            MetaOp::Gt => "$gt",
            MetaOp::Gte => "$gte",
            MetaOp::Lt => "$lt",
            MetaOp::Lte => "$lte",
            MetaOp::Regex => "$regex",
        }
    }
}

/// One constraint on an indexed metadata field.
#[derive(Debug, Clone)]
pub struct MetaFilter {
    /// Dot-path under `metaIndexed`, e.g. `"customer.tier"`.
    pub field: String,
    /// Operator to apply.
    pub op: MetaOp,
    /// Operand, as plain JSON (converted to BSON during query build).
    pub value: Value,
}

impl MetaFilter {
    /// Build an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        MetaFilter {
            field: field.into(),
            op: MetaOp::Eq,
            value,
        }
    }
}

fn json_to_bson(value: &Value) -> Result<Bson, ChronosError> {
    bson::to_bson(value).map_err(|e| ChronosError::Validation(format!("invalid filter operand: {e}")))
}

/// Build a `metaIndexed.*`-scoped Mongo filter document from a list of
/// safe filters, ANDed together. Rejects empty field names.
pub fn build_filter(filters: &[MetaFilter]) -> Result<Document, ChronosError> {
    let mut doc = Document::new();
    for filter in filters {
        if filter.field.is_empty() {
            return Err(ChronosError::Validation(
                "metadata filter field must not be empty".to_string(),
            ));
        }
        let path = format!("metaIndexed.{}", filter.field);
        let operand = json_to_bson(&filter.value)?;
        let clause = doc! { filter.op.mongo_op(): operand };
        doc.insert(path, clause);
    }
    Ok(doc)
}

/// Cursor pagination parameters: resume strictly after `after_id` (by
/// `_id` ascending order), capped at `limit` documents.
#[derive(Debug, Clone)]
pub struct CursorPage {
    /// Exclusive lower bound on `_id`, if resuming a prior page.
    pub after_id: Option<String>,
    /// Maximum documents to return.
    pub limit: i64,
}

impl CursorPage {
    /// Build the `_id` portion of a cursor query.
    pub fn id_filter(&self) -> Document {
        match &self.after_id {
            Some(id) => doc! { "_id": { "$gt": id } },
            None => Document::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_filter_scopes_field_under_meta_indexed() {
        let filters = vec![MetaFilter::eq("status", json!("active"))];
        let doc = build_filter(&filters).unwrap();
        assert!(doc.contains_key("metaIndexed.status"));
    }

    #[test]
    fn empty_field_is_rejected() {
        let filters = vec![MetaFilter::eq("", json!("x"))];
        assert!(build_filter(&filters).is_err());
    }

    #[test]
    fn multiple_filters_and_together() {
        let filters = vec![
            MetaFilter::eq("status", json!("active")),
            MetaFilter {
                field: "amount".to_string(),
                op: MetaOp::Gte,
                value: json!(100),
            },
        ];
        let doc = build_filter(&filters).unwrap();
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn cursor_without_after_id_has_empty_filter() {
        let page = CursorPage {
            after_id: None,
            limit: 10,
        };
        assert!(page.id_filter().is_empty());
    }

    #[test]
    fn cursor_with_after_id_uses_gt() {
        let page = CursorPage {
            after_id: Some("abc".to_string()),
            limit: 10,
        };
        let doc = page.id_filter();
        assert!(doc.contains_key("_id"));
    }
}
