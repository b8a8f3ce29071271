//! Mapping between [`VectorRecord`]s and Qdrant points.

use crate::vector::{VectorMetadata, VectorRecord};
use serde_json::{Map, Value, json};
use uuid::Uuid;

const CHUNK_ID_FIELD: &str = "chunk_id";

/// Deterministic point id for a chunk id.
///
/// Qdrant only accepts unsigned integers or UUIDs, so chunk ids are mapped through UUID v5.
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// Serialize a record into the JSON point body used by the upsert endpoint.
pub(crate) fn build_point(record: &VectorRecord) -> Result<Value, serde_json::Error> {
    let mut payload = match serde_json::to_value(&record.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert(CHUNK_ID_FIELD.into(), Value::String(record.id.clone()));
    Ok(json!({
        "id": point_id(&record.id),
        "vector": record.vector,
        "payload": payload,
    }))
}

/// Recover the chunk id and typed metadata from a point payload.
pub(crate) fn parse_payload(
    mut payload: Map<String, Value>,
) -> Result<(String, VectorMetadata), serde_json::Error> {
    let chunk_id = match payload.remove(CHUNK_ID_FIELD) {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };
    let metadata: VectorMetadata = serde_json::from_value(Value::Object(payload))?;
    let chunk_id =
        chunk_id.unwrap_or_else(|| format!("{}_{}", metadata.document_id, metadata.chunk_index));
    Ok((chunk_id, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::record::fixtures::record;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("doc-1_0");
        assert_eq!(first, point_id("doc-1_0"));
        assert_ne!(first, point_id("doc-1_1"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn payload_carries_chunk_id_and_metadata() {
        let record = record("acme", "doc-1", 3, "Pump specifications", vec![0.5, 0.5]);
        let point = build_point(&record).expect("point");
        assert_eq!(point["id"], Value::String(point_id("doc-1_3")));
        assert_eq!(point["payload"]["tenant_id"], "acme");
        assert_eq!(point["payload"]["chunk_id"], "doc-1_3");

        let Value::Object(payload) = point["payload"].clone() else {
            panic!("payload should be an object");
        };
        let (chunk_id, metadata) = parse_payload(payload).expect("parse");
        assert_eq!(chunk_id, "doc-1_3");
        assert_eq!(metadata, record.metadata);
    }
}
