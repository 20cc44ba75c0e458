//! Envelope and persisted-entry types shared by the stores.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::util::{id_of, merge_fields};

/// Uniform return shape for every store operation.
///
/// `data` is an object for single reads and an array for list reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreGetReturn {
  pub data: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters: Option<Vec<String>>,
}

impl StoreGetReturn {
  pub fn new(data: Value) -> Self {
    Self {
      data,
      count: None,
      filters: None,
    }
  }

  pub fn list(items: Vec<Value>) -> Self {
    Self {
      count: Some(items.len() as u64),
      data: Value::Array(items),
      filters: None,
    }
  }

  /// Normalize a raw response body.
  ///
  /// Bodies that already look like `{data, count?, filters?}` are taken as-is;
  /// anything else is wrapped as `{data: body}`.
  pub fn from_response(body: Value) -> Self {
    let is_envelope = body.as_object().is_some_and(|obj| {
      obj.contains_key("data") && obj.keys().all(|k| matches!(k.as_str(), "data" | "count" | "filters"))
    });
    if is_envelope {
      if let Ok(envelope) = serde_json::from_value::<StoreGetReturn>(body.clone()) {
        return envelope;
      }
    }
    Self::new(body)
  }

  pub fn items(&self) -> Option<&Vec<Value>> {
    self.data.as_array()
  }

  /// Deserialize `data` into a typed value.
  pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_value(self.data.clone())?)
  }

  /// Merge `patch` into every object in `data` sharing its id.
  ///
  /// Returns true if anything changed.
  pub fn merge_matching(&mut self, id: &str, patch: &Value) -> bool {
    if let Some(items) = self.data.as_array_mut() {
      let mut changed = false;
      for item in items.iter_mut().filter(|item| id_of(item).as_deref() == Some(id)) {
        merge_fields(item, patch);
        changed = true;
      }
      return changed;
    }
    if self.data.is_object() && id_of(&self.data).as_deref() == Some(id) {
      merge_fields(&mut self.data, patch);
      return true;
    }
    false
  }
}

/// Staleness bookkeeping stored next to every persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMeta {
  pub stored_on: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_update: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub earliest_data: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_detailed: Option<bool>,
}

impl LocalMeta {
  pub fn stored_now() -> Self {
    Self {
      stored_on: Utc::now(),
      last_update: None,
      earliest_data: None,
      is_detailed: None,
    }
  }

  /// Fresh iff strictly younger than `window` at `now`.
  pub fn is_fresh_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
    now - self.stored_on < window
  }

  pub fn is_fresh(&self, window: Duration) -> bool {
    self.is_fresh_at(Utc::now(), window)
  }
}

/// The unit written to the local persisted cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocallyStoredItem {
  pub meta: LocalMeta,
  pub data: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters: Option<Vec<String>>,
}

impl LocallyStoredItem {
  pub fn new(meta: LocalMeta, envelope: &StoreGetReturn) -> Self {
    Self {
      meta,
      data: envelope.data.clone(),
      count: envelope.count,
      filters: envelope.filters.clone(),
    }
  }

  pub fn envelope(&self) -> StoreGetReturn {
    StoreGetReturn {
      data: self.data.clone(),
      count: self.count,
      filters: self.filters.clone(),
    }
  }
}
