//! Small helpers shared across the crate.

use serde_json::Value;

/// Round to `places` decimal places, half away from zero.
///
/// Scales through the decimal string form so values like `1.005` round the way
/// they read instead of the way they are stored in binary.
pub fn round_to(value: f64, places: u32) -> f64 {
  if !value.is_finite() {
    return value;
  }
  let scaled: f64 = match format!("{}e{}", value, places).parse() {
    Ok(v) => v,
    Err(_) => return value,
  };
  format!("{}e-{}", scaled.round(), places)
    .parse()
    .unwrap_or(value)
}

/// Shallow-merge the fields of `patch` into `target`.
///
/// Non-object patches replace the target outright.
pub fn merge_fields(target: &mut Value, patch: &Value) {
  match (target.as_object_mut(), patch.as_object()) {
    (Some(target), Some(patch)) => {
      for (k, v) in patch {
        target.insert(k.clone(), v.clone());
      }
    }
    _ => *target = patch.clone(),
  }
}

/// Read an entity's `id` as a string, so `1` and `"1"` compare equal.
pub fn id_of(value: &Value) -> Option<String> {
  match value.get("id")? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}
