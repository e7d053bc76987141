use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cid::Cid;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Canonical string form of a wire identifier.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_decode(value: &str) -> Result<Vec<u8>, CoreError> {
    STANDARD
        .decode(value)
        .map_err(|_| CoreError::Deserialization)
}

/// Best-effort IPFS content-id rendering, used on logging paths only. The
/// canonical stored form of an event id stays base64.
pub fn cid_string(bytes: &[u8]) -> Option<String> {
    Cid::try_from(bytes).ok().map(|c| c.to_string())
}

pub fn decode_event<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|_| CoreError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64_round_trip() {
        let bytes = b"opaque-key".to_vec();
        assert_eq!(b64_decode(&b64_encode(&bytes)).expect("decode"), bytes);
    }

    #[test]
    fn cid_string_rejects_garbage() {
        assert!(cid_string(b"not-a-cid").is_none());
    }
}
