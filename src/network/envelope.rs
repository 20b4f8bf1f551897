//! The `mdb://<type>/<base64url(JSON(payload))>` envelope scheme: a compact, transport-neutral
//! serializer for small out-of-band payloads such as join-request/join-response messages.

use crate::constants::ENVELOPE_SCHEME;
use crate::{Error, Result};
use base64ct::{Base64Url, Encoding};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Encode `payload` (which must serialize to a JSON object carrying an integer `v` field) as
/// an `mdb://` envelope of the given `envelope_type`.
pub fn encode<T: Serialize>(envelope_type: &str, payload: &T) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    if !value.is_object() {
        return Err(Error::InvalidOperation(
            "envelope payload must serialize to a JSON object".into(),
        ));
    }
    if value.get("v").and_then(Value::as_i64).is_none() {
        return Err(Error::InvalidOperation(
            "envelope payload must carry an integer 'v' version field".into(),
        ));
    }

    let json = serde_json::to_vec(&value)?;
    let encoded = Base64Url::encode_string(&json);
    Ok(format!("{ENVELOPE_SCHEME}{envelope_type}/{encoded}"))
}

/// Decode an `mdb://` envelope, checking the declared type and extracting the payload.
/// Fails on: wrong scheme prefix, missing separator, unknown type, empty/invalid base64,
/// non-object JSON, or a missing/invalid `v` field.
pub fn decode<T: DeserializeOwned>(envelope_type: &str, uri: &str) -> Result<T> {
    let rest = uri
        .strip_prefix(ENVELOPE_SCHEME)
        .ok_or_else(|| Error::InvalidOperation("envelope missing 'mdb://' scheme prefix".into()))?;

    let (found_type, encoded) = rest
        .split_once('/')
        .ok_or_else(|| Error::InvalidOperation("envelope missing type/payload separator".into()))?;

    if found_type != envelope_type {
        return Err(Error::InvalidOperation(format!(
            "unknown envelope type: expected '{envelope_type}', found '{found_type}'"
        )));
    }
    if encoded.is_empty() {
        return Err(Error::InvalidOperation("envelope payload is empty".into()));
    }

    let json = Base64Url::decode_vec(encoded)
        .map_err(|e| Error::InvalidOperation(format!("invalid base64 in envelope: {e}")))?;
    let value: Value = serde_json::from_slice(&json)?;

    if !value.is_object() {
        return Err(Error::InvalidOperation("envelope payload is not a JSON object".into()));
    }
    if value.get("v").and_then(Value::as_i64).is_none() {
        return Err(Error::InvalidOperation(
            "envelope payload missing integer 'v' version field".into(),
        ));
    }

    serde_json::from_value(value).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct JoinRequest {
        v: i32,
        user: String,
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let payload = JoinRequest {
            v: 1,
            user: "alice".into(),
        };
        let uri = encode("join_request", &payload).unwrap();
        assert!(uri.starts_with("mdb://join_request/"));
        let decoded: JoinRequest = decode("join_request", &uri).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_wrong_scheme() {
        let result: Result<JoinRequest> = decode("join_request", "http://join_request/abc");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        let result: Result<JoinRequest> = decode("join_request", "mdb://join_request");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mismatched_type() {
        let payload = JoinRequest { v: 1, user: "alice".into() };
        let uri = encode("join_request", &payload).unwrap();
        let result: Result<JoinRequest> = decode("join_response", &uri);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_version_field() {
        #[derive(Serialize)]
        struct NoVersion {
            user: String,
        }
        let err = encode("join_request", &NoVersion { user: "alice".into() });
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        let result: Result<JoinRequest> = decode("join_request", "mdb://join_request/not-valid-base64!!!");
        assert!(result.is_err());
    }
}
