//! Decoding of push payloads into snapshots.
//!
//! The state stream sends either an envelope `{"state": {...}}` or a bare
//! snapshot object. An envelope whose `state` is empty (null, `false`,
//! zero, an empty string, array or object) is read as a bare object.
//! Anything else is a malformed payload: the caller logs it and
//! moves on to the next message.

use std::num::FpCategory;

use cityflow_types::StateSnapshot;
use serde_json::Value;

use crate::error::SyncError;

/// Decode one push message into a [`StateSnapshot`].
///
/// # Errors
///
/// Returns [`SyncError::MalformedPayload`] if the text is not JSON, is not
/// an object, carries a non-empty `state` that is not an object, or does
/// not validate as a snapshot.
pub fn decode_push_payload(text: &str) -> Result<StateSnapshot, SyncError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SyncError::MalformedPayload(format!("invalid JSON: {e}")))?;

    let Value::Object(mut object) = value else {
        return Err(SyncError::MalformedPayload(
            "expected a JSON object".to_owned(),
        ));
    };

    let body = match object.remove("state").filter(|state| !is_empty(state)) {
        None => Value::Object(object),
        Some(state @ Value::Object(_)) => state,
        Some(_) => {
            return Err(SyncError::MalformedPayload(
                "state must be an object".to_owned(),
            ));
        }
    };

    serde_json::from_value(body)
        .map_err(|e| SyncError::MalformedPayload(format!("invalid snapshot: {e}")))
}

/// Whether an envelope's `state` carries nothing and should be ignored.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number
            .as_f64()
            .is_some_and(|n| n.classify() == FpCategory::Zero),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}
