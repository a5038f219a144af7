use serde::{Deserialize, Serialize};

use crate::types::ByteRange;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Sends one chunk of a session's file.
///
/// The `payload` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub session_id: String,
    pub index: u32,
    pub range: ByteRange,
    /// SHA-256 hex checksum of `payload` (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Asks the storage to assemble a session's chunks into the final object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub session_id: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

/// Cancels a session and lets the storage drop its stored chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of a content-hash lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Chunk indices the storage already holds for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunksResponse {
    pub session_id: String,
    #[serde(default)]
    pub indices: Vec<u32>,
}

/// Acknowledges a stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub session_id: String,
    pub index: u32,
    pub received_bytes: u64,
}

/// Location of a finalized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub url: String,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_chunk_payload_is_base64() {
        let req = UploadChunkRequest {
            session_id: "s1".into(),
            index: 0,
            range: ByteRange::new(0, 5),
            checksum: String::new(),
            payload: b"Hello".to_vec(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("SGVsbG8="));
        assert!(!json.contains("checksum"));
        let parsed: UploadChunkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, parsed);
    }

    #[test]
    fn upload_chunk_rejects_bad_base64() {
        let json = r#"{"sessionId":"s","index":0,"range":{"start":0,"end":1},"payload":"***"}"#;
        assert!(serde_json::from_str::<UploadChunkRequest>(json).is_err());
    }

    #[test]
    fn exists_response_without_url() {
        let resp: ExistsResponse = serde_json::from_str(r#"{"exists":false}"#).unwrap();
        assert!(!resp.exists);
        assert!(resp.url.is_none());
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"exists":false}"#);
    }

    #[test]
    fn uploaded_chunks_default_indices() {
        let resp: UploadedChunksResponse =
            serde_json::from_str(r#"{"sessionId":"s1"}"#).unwrap();
        assert!(resp.indices.is_empty());
    }

    #[test]
    fn finalize_request_field_names() {
        let req = FinalizeRequest {
            session_id: "s1".into(),
            content_hash: "abc".into(),
            file_name: "notes.pdf".into(),
            file_size: 42,
            total_chunks: 1,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"contentHash\":\"abc\""));
        assert!(json.contains("\"totalChunks\":1"));
    }
}
