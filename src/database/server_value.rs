use chrono::Utc;
use serde_json::{Map, Number, Value};

use crate::database::backend::{SdkException, SdkResult};

/// Placeholder the store replaces with its own clock (milliseconds since the epoch).
pub fn server_timestamp() -> Value {
    serde_json::json!({ ".sv": "timestamp" })
}

/// Placeholder the store replaces with the current numeric value plus `delta`.
///
/// # Arguments
/// * `delta` - Amount to atomically add to the current value.
pub fn increment(delta: f64) -> Value {
    serde_json::json!({
        ".sv": {
            "increment": delta,
        }
    })
}

/// Replaces every `.sv` placeholder in `value`; `current` is the plain value being overwritten.
pub(crate) fn resolve_server_values(value: Value, current: Option<&Value>) -> SdkResult<Value> {
    match value {
        Value::Object(mut map) => {
            if let Some(spec) = map.remove(".sv") {
                return resolve_placeholder(spec, current);
            }
            let mut resolved = Map::with_capacity(map.len());
            for (key, child) in map.into_iter() {
                let child_current = current.and_then(|curr| match curr {
                    Value::Object(obj) => obj.get(&key),
                    _ => None,
                });
                resolved.insert(key, resolve_server_values(child, child_current)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for (index, child) in items.into_iter().enumerate() {
                let child_current = current.and_then(|curr| match curr {
                    Value::Object(obj) => obj.get(&index.to_string()),
                    _ => None,
                });
                resolved.push(resolve_server_values(child, child_current)?);
            }
            Ok(Value::Array(resolved))
        }
        other => Ok(other),
    }
}

fn resolve_placeholder(spec: Value, current: Option<&Value>) -> SdkResult<Value> {
    match spec {
        Value::String(token) if token == "timestamp" => {
            Ok(Value::Number(Number::from(Utc::now().timestamp_millis())))
        }
        Value::Object(mut map) => {
            let delta = map
                .remove("increment")
                .ok_or_else(|| SdkException::new("Unsupported server value placeholder"))?;
            let delta = delta
                .as_f64()
                .ok_or_else(|| SdkException::new("ServerValue.increment delta must be numeric"))?;
            let base = current.and_then(Value::as_f64).unwrap_or(0.0);
            let total = base + delta;
            if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
                return Ok(Value::Number(Number::from(total as i64)));
            }
            Number::from_f64(total)
                .map(Value::Number)
                .ok_or_else(|| SdkException::new("ServerValue.increment produced an invalid number"))
        }
        _ => Err(SdkException::new("Unsupported server value placeholder")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_is_resolved_to_current_millis() {
        let before = Utc::now().timestamp_millis();
        let resolved = resolve_server_values(json!({ "at": server_timestamp() }), None).unwrap();
        let at = resolved["at"].as_i64().unwrap();
        assert!(at >= before);
    }

    #[test]
    fn increment_adds_to_existing_number() {
        let current = json!({ "count": 2 });
        let resolved =
            resolve_server_values(json!({ "count": increment(3.0) }), Some(&current)).unwrap();
        assert_eq!(resolved, json!({ "count": 5 }));

        let fresh = resolve_server_values(increment(1.5), None).unwrap();
        assert_eq!(fresh, json!(1.5));
    }

    #[test]
    fn unknown_placeholders_are_rejected() {
        assert!(resolve_server_values(json!({ ".sv": "nope" }), None).is_err());
    }
}
