//! Filter builders. Every filter produced here carries the tenant condition.

use super::payload::point_id;
use crate::tenant::TenantId;
use crate::vector::{DeleteSelector, MetadataFilter};
use serde_json::{Value, json};

fn match_value(key: &str, value: impl Into<Value>) -> Value {
    json!({
        "key": key,
        "match": { "value": value.into() }
    })
}

/// Search filter: mandatory tenant scope plus optional metadata constraints.
pub fn build_tenant_filter(tenant: &TenantId, filter: &MetadataFilter) -> Value {
    let mut must = vec![match_value("tenant_id", tenant.as_str())];

    if let Some(document_id) = filter.document_id.as_deref() {
        must.push(match_value("document_id", document_id));
    }
    if let Some(content_type) = filter.content_type {
        must.push(match_value("content_type", content_type.as_str()));
    }
    if let Some(min_quality) = filter.min_quality {
        must.push(json!({
            "key": "quality_score",
            "range": { "gte": min_quality }
        }));
    }

    json!({ "must": must })
}

/// Delete filter for `selector`, scoped to `tenant`.
pub fn build_delete_filter(tenant: &TenantId, selector: &DeleteSelector) -> Value {
    let tenant_condition = match_value("tenant_id", tenant.as_str());
    match selector {
        DeleteSelector::Ids(ids) => {
            let point_ids: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
            json!({
                "must": [tenant_condition, { "has_id": point_ids }]
            })
        }
        DeleteSelector::Document(document_id) => json!({
            "must": [tenant_condition, match_value("document_id", document_id.as_str())]
        }),
        DeleteSelector::ExceptDocuments(keep) if keep.is_empty() => json!({
            "must": [tenant_condition]
        }),
        DeleteSelector::ExceptDocuments(keep) => json!({
            "must": [tenant_condition],
            "must_not": [{
                "key": "document_id",
                "match": { "any": keep }
            }]
        }),
    }
}
