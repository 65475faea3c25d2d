//! Snapshot and plain-object encodings.
//!
//! Snapshots come in two forms: raw Loro snapshot bytes, and the same bytes
//! as standard base64 for storing in text fields.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tandem_editor_core::{KeyGenerator, Value};

use crate::{ActorId, CrdtDocument, CrdtError};

pub fn encode_snapshot(doc: &CrdtDocument) -> Result<Vec<u8>, CrdtError> {
    doc.save()
}

/// Load a snapshot for `actor`. Fails with `CorruptDocument` on bad bytes.
pub fn decode_snapshot(bytes: &[u8], actor: ActorId) -> Result<CrdtDocument, CrdtError> {
    CrdtDocument::load(bytes, actor)
}

pub fn encode_snapshot_text(doc: &CrdtDocument) -> Result<String, CrdtError> {
    Ok(STANDARD.encode(doc.save()?))
}

pub fn decode_snapshot_text(text: &str, actor: ActorId) -> Result<CrdtDocument, CrdtError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| CrdtError::CorruptDocument(format!("invalid base64 snapshot: {e}")))?;
    CrdtDocument::load(&bytes, actor)
}

/// Editor value as plain-object JSON.
pub fn value_to_json(value: &Value) -> Result<String, CrdtError> {
    value
        .to_json()
        .map_err(|e| CrdtError::Serialization(e.to_string()))
}

/// Parse plain-object JSON, keying nodes that arrive without a key.
pub fn value_from_json(json: &str, keys: &mut KeyGenerator) -> Result<Value, CrdtError> {
    Value::from_json(json, keys).map_err(|e| CrdtError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLATE: &str = r#"{
        "document": {
            "nodes": [
                { "object": "block", "type": "paragraph",
                  "nodes": [{ "object": "text", "leaves": [{ "text": "Hello" }] }] }
            ]
        }
    }"#;

    #[test]
    fn test_text_snapshot_loads_same_document() {
        let mut keys = KeyGenerator::new("seed");
        let value = value_from_json(SLATE, &mut keys).unwrap();
        let doc = CrdtDocument::from_value(ActorId(7), &value).unwrap();
        let text = encode_snapshot_text(&doc).unwrap();
        let loaded = decode_snapshot_text(&text, ActorId(8)).unwrap();
        assert_eq!(loaded.value().unwrap(), value.document);
        assert_eq!(loaded.actor(), ActorId(8));
    }

    #[test]
    fn test_garbage_snapshot_is_corrupt() {
        assert!(matches!(
            decode_snapshot(b"not a snapshot", ActorId(1)),
            Err(CrdtError::CorruptDocument(_))
        ));
        assert!(matches!(
            decode_snapshot_text("***", ActorId(1)),
            Err(CrdtError::CorruptDocument(_))
        ));
    }
}
