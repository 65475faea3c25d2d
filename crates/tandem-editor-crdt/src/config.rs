//! Sync configuration.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::codec;
use crate::{ActorId, CrdtDocument, CrdtError};

/// How snapshots are written to storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotEncoding {
    /// Raw snapshot bytes.
    #[default]
    Binary,
    /// Standard base64 text.
    Base64,
}

impl SnapshotEncoding {
    pub fn encode(self, doc: &CrdtDocument) -> Result<Vec<u8>, CrdtError> {
        match self {
            SnapshotEncoding::Binary => codec::encode_snapshot(doc),
            SnapshotEncoding::Base64 => codec::encode_snapshot_text(doc).map(String::into_bytes),
        }
    }

    pub fn decode(self, bytes: &[u8], actor: ActorId) -> Result<CrdtDocument, CrdtError> {
        match self {
            SnapshotEncoding::Binary => codec::decode_snapshot(bytes, actor),
            SnapshotEncoding::Base64 => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| CrdtError::CorruptDocument(format!("snapshot is not text: {e}")))?;
                codec::decode_snapshot_text(text, actor)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Id every replica uses for the shared document.
    pub document_id: SmolStr,
    /// Upper bound on messages routed by one pump of the coordinator.
    pub max_deliveries_per_pump: usize,
    pub snapshot_encoding: SnapshotEncoding,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            document_id: SmolStr::new_static("doc"),
            max_deliveries_per_pump: 10_000,
            snapshot_encoding: SnapshotEncoding::Binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "snapshot_encoding": "base64" }"#).unwrap();
        assert_eq!(config.document_id, "doc");
        assert_eq!(config.max_deliveries_per_pump, 10_000);
        assert_eq!(config.snapshot_encoding, SnapshotEncoding::Base64);
    }

    #[test]
    fn test_base64_encoding_roundtrips() {
        let doc = CrdtDocument::new(ActorId(1)).unwrap();
        let bytes = SnapshotEncoding::Base64.encode(&doc).unwrap();
        assert!(std::str::from_utf8(&bytes).is_ok());
        let loaded = SnapshotEncoding::Base64.decode(&bytes, ActorId(2)).unwrap();
        assert_eq!(loaded.value().unwrap(), doc.value().unwrap());
    }
}
