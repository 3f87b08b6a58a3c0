//! On-wire JSON shapes for the four protocols (spec.md §6).

use meshfile_primitives::PeerInfo;
use serde::{Deserialize, Serialize};

/// `exists`/`data` request: `{"chunkHash":"<hex>"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRequest {
    #[serde(rename = "chunkHash")]
    pub chunk_hash: String,
}

impl ChunkRequest {
    #[must_use]
    pub fn new(chunk_hash_hex: impl Into<String>) -> Self {
        Self {
            chunk_hash: chunk_hash_hex.into(),
        }
    }
}

/// `exists` response: the JSON *string* `"true"` or `"false"`, not a JSON
/// boolean (spec.md §4.7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExistsResponse(pub bool);

impl Serialize for ExistsResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(if self.0 { "true" } else { "false" })
    }
}

impl<'de> Deserialize<'de> for ExistsResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "true" => Ok(Self(true)),
            "false" => Ok(Self(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected \"true\" or \"false\", got {other:?}"
            ))),
        }
    }
}

/// Announce request line: `{"chunk_hash":"<hex>","peer_info":{...}}`.
/// Field names are intentionally snake_case, unlike the exists/data
/// requests — an asymmetry preserved from the wire format (spec.md §9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub chunk_hash: String,
    pub peer_info: PeerInfo,
}

/// Lookup request line: `{"key":"<hex-or-string>"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupRequest {
    pub key: String,
}

impl LookupRequest {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Lookup response line: `{"providers":[peer_info, ...]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LookupResponse {
    pub providers: Vec<PeerInfo>,
}

#[cfg(test)]
mod tests {
    use libp2p_identity::Keypair;

    use super::*;

    #[test]
    fn exists_response_serializes_as_json_string() {
        assert_eq!(serde_json::to_string(&ExistsResponse(true)).unwrap(), "\"true\"");
        assert_eq!(serde_json::to_string(&ExistsResponse(false)).unwrap(), "\"false\"");
    }

    #[test]
    fn exists_response_rejects_json_boolean() {
        assert!(serde_json::from_str::<ExistsResponse>("true").is_err());
    }

    #[test]
    fn exists_response_round_trips() {
        let decoded: ExistsResponse = serde_json::from_str("\"true\"").unwrap();
        assert_eq!(decoded, ExistsResponse(true));
    }

    #[test]
    fn chunk_request_uses_camel_case_field() {
        let request = ChunkRequest::new("abcd");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"chunkHash":"abcd"}"#);
    }

    #[test]
    fn announce_message_uses_snake_case_fields() {
        let id = Keypair::generate_ed25519().public().to_peer_id();
        let message = AnnounceMessage {
            chunk_hash: "abcd".into(),
            peer_info: PeerInfo::new(id, vec![]),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.starts_with(r#"{"chunk_hash":"abcd","peer_info":"#));
    }

    #[test]
    fn lookup_response_round_trips_through_json() {
        let response = LookupResponse::default();
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"providers":[]}"#);
        let decoded: LookupResponse = serde_json::from_str(&json).unwrap();
        assert!(decoded.providers.is_empty());
    }
}
