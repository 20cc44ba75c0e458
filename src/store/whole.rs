//! Whole-collection store refreshed from a last-update watermark.

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::inflight::InFlight;
use super::local::LocalCache;
use super::types::{LocalMeta, LocallyStoredItem, StoreGetReturn};
use super::{require_id, target_id, Store, StoreSettings};
use crate::api::{PathOptions, QueryParams, Transport};
use crate::auth::Auth;
use crate::error::Result;
use crate::util::{id_of, merge_fields};

/// Watermark used before the first refresh: asks the server for everything.
pub const EPOCH_WATERMARK: &str = "0001-01-01T00:00:00Z";

#[derive(Debug, Clone)]
struct Collection {
  items: Vec<Value>,
  meta: LocalMeta,
}

type Collections = Arc<Mutex<HashMap<String, Collection>>>;

/// Holds an entire collection per user and pulls only what changed.
///
/// Each refresh sends the stored watermark as `lastUpdate`, merges the returned
/// records by id, then moves the watermark to the client's current time.
pub struct WholeLastUpdatedStore {
  name: String,
  auth: Arc<Auth>,
  transport: Option<Arc<dyn Transport>>,
  local: Option<Arc<dyn LocalCache>>,
  expiry: Duration,
  collections: Collections,
  inflight: InFlight<Result<Vec<Value>>>,
}

impl WholeLastUpdatedStore {
  pub const DEFAULT_EXPIRY_HOURS: i64 = 12;

  pub fn new(settings: StoreSettings) -> Self {
    Self {
      name: settings.name,
      auth: settings.auth,
      transport: settings.transport,
      local: settings.local,
      expiry: settings
        .expiry
        .unwrap_or_else(|| Duration::hours(Self::DEFAULT_EXPIRY_HOURS)),
      collections: Arc::new(Mutex::new(HashMap::new())),
      inflight: InFlight::new(),
    }
  }

  pub fn key(&self) -> String {
    format!("{}_{}", self.name, self.auth.user_id())
  }

  fn collections(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
    self.collections.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The current watermark, if the collection has been loaded.
  pub fn watermark(&self) -> Option<String> {
    self
      .collections()
      .get(&self.key())
      .and_then(|c| c.meta.last_update.clone())
  }

  /// Copy the persisted collection into memory. Returns whether it is fresh.
  fn load_local(&self, key: &str) -> Result<Option<bool>> {
    let Some(local) = &self.local else {
      return Ok(None);
    };
    let Some(stored) = local.get(key)? else {
      return Ok(None);
    };

    let fresh = self.transport.is_none() || stored.meta.is_fresh(self.expiry);
    debug!(key, fresh, "loaded collection from local cache");
    let items = match stored.data {
      Value::Array(items) => items,
      _ => Vec::new(),
    };
    self.collections().insert(
      key.to_string(),
      Collection {
        items,
        meta: stored.meta,
      },
    );
    Ok(Some(fresh))
  }

  /// The full collection, refreshing it when asked to or when nothing is cached.
  async fn load(&self, opts: PathOptions) -> Result<Vec<Value>> {
    let key = self.key();

    let in_memory = self.collections().get(&key).map(|c| c.items.clone());
    match in_memory {
      Some(items) if !opts.refresh => return Ok(items),
      Some(_) => {}
      None => {
        if self.load_local(&key)? == Some(true) && !opts.refresh {
          return Ok(self.items(&key));
        }
      }
    }

    if self.transport.is_none() {
      return Ok(self.items(&key));
    }
    self.refresh(key, opts, false).await
  }

  fn items(&self, key: &str) -> Vec<Value> {
    self
      .collections()
      .get(key)
      .map(|c| c.items.clone())
      .unwrap_or_default()
  }

  async fn refresh(&self, key: String, opts: PathOptions, from_epoch: bool) -> Result<Vec<Value>> {
    let Some(transport) = self.transport.clone() else {
      return Ok(self.items(&key));
    };
    let collections = self.collections.clone();
    let local = self.local.clone();
    let refresh_key = key.clone();
    // A full re-pull must not join an incremental refresh already in flight.
    let flight_key = if from_epoch {
      format!("{}_restore", key)
    } else {
      key
    };
    self
      .inflight
      .run(&flight_key, move || {
        refresh_collection(transport, collections, local, refresh_key, opts, from_epoch)
      })
      .await
  }

  /// Apply a write to the loaded collection and persist it.
  ///
  /// Collections that were never loaded are left alone so the first read still
  /// pulls the full set; purely local stores start an empty one.
  fn apply(&self, f: impl FnOnce(&mut Vec<Value>)) -> Result<()> {
    let key = self.key();
    if !self.collections().contains_key(&key) {
      self.load_local(&key)?;
    }

    let snapshot = {
      let mut collections = self.collections();
      if !collections.contains_key(&key) {
        if self.transport.is_some() {
          return Ok(());
        }
        collections.insert(
          key.clone(),
          Collection {
            items: Vec::new(),
            meta: LocalMeta::stored_now(),
          },
        );
      }
      let Some(collection) = collections.get_mut(&key) else {
        return Ok(());
      };
      f(&mut collection.items);
      collection.clone()
    };

    if let Some(local) = &self.local {
      persist(local.as_ref(), &key, &snapshot);
    }
    Ok(())
  }
}

/// Replace records sharing an id, append the rest.
fn merge_by_id(items: &mut Vec<Value>, incoming: Vec<Value>) {
  for record in incoming {
    let id = id_of(&record);
    match items.iter_mut().find(|item| id.is_some() && id_of(item) == id) {
      Some(existing) => *existing = record,
      None => items.push(record),
    }
  }
}

fn upsert(items: &mut Vec<Value>, id: &str, fields: &Value) {
  match items.iter_mut().find(|item| id_of(item).as_deref() == Some(id)) {
    Some(existing) => merge_fields(existing, fields),
    None => items.push(fields.clone()),
  }
}

async fn refresh_collection(
  transport: Arc<dyn Transport>,
  collections: Collections,
  local: Option<Arc<dyn LocalCache>>,
  key: String,
  mut opts: PathOptions,
  from_epoch: bool,
) -> Result<Vec<Value>> {
  let watermark = if from_epoch {
    None
  } else {
    collections
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&key)
      .and_then(|c| c.meta.last_update.clone())
  };
  let watermark = watermark.unwrap_or_else(|| EPOCH_WATERMARK.to_string());

  // Filters and paging would make the merged delta look like the whole set.
  opts.id = None;
  opts.final_url = None;
  opts.params = QueryParams::default();
  opts
    .params
    .other
    .insert("lastUpdate".to_string(), watermark.clone());

  debug!(%key, %watermark, "refreshing collection");
  let Some(body) = transport.get_all(opts).await? else {
    // Nothing came back (error swallowed upstream); keep the old watermark.
    return Ok(
      collections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .map(|c| c.items.clone())
        .unwrap_or_default(),
    );
  };

  let changed = match StoreGetReturn::from_response(body).data {
    Value::Array(records) => records,
    Value::Null => Vec::new(),
    record => vec![record],
  };
  let changed_count = changed.len();

  let now = Utc::now();
  let snapshot = {
    let mut collections = collections.lock().unwrap_or_else(PoisonError::into_inner);
    let collection = collections.entry(key.clone()).or_insert_with(|| Collection {
      items: Vec::new(),
      meta: LocalMeta::stored_now(),
    });
    merge_by_id(&mut collection.items, changed);
    collection.meta.stored_on = now;
    collection.meta.last_update = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));
    collection.clone()
  };

  info!(
    %key,
    changed = changed_count,
    total = snapshot.items.len(),
    "collection refreshed"
  );
  if let Some(local) = &local {
    persist(local.as_ref(), &key, &snapshot);
  }
  Ok(snapshot.items)
}

fn persist(local: &dyn LocalCache, key: &str, collection: &Collection) {
  let item = LocallyStoredItem::new(
    collection.meta.clone(),
    &StoreGetReturn::list(collection.items.clone()),
  );
  if let Err(e) = local.set(key, &item) {
    warn!(key, error = %e, "failed to persist collection");
  }
}

#[async_trait]
impl Store for WholeLastUpdatedStore {
  fn name(&self) -> &str {
    &self.name
  }

  async fn get(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let id = opts.id.clone();
    let items = self.load(opts).await?;
    Ok(match id {
      Some(id) => items
        .into_iter()
        .find(|item| id_of(item).as_deref() == Some(id.as_str()))
        .map(StoreGetReturn::new),
      None => Some(StoreGetReturn::list(items)),
    })
  }

  /// The whole collection, or the page `take_from`/`take_amount` ask for.
  ///
  /// `count` is always the size of the whole collection.
  async fn get_all(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let (skip, take) = (opts.params.take_from, opts.params.take_amount);
    let items = self.load(opts).await?;
    let total = items.len() as u64;

    let skip = skip.unwrap_or(0) as usize;
    let take = take.map_or(usize::MAX, |n| n as usize);
    let page = items.into_iter().skip(skip).take(take).collect();
    Ok(Some(StoreGetReturn {
      count: Some(total),
      ..StoreGetReturn::list(page)
    }))
  }

  async fn post(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let saved = match &self.transport {
      Some(transport) => transport
        .post(opts.clone())
        .await?
        .map(StoreGetReturn::from_response),
      None => opts.data.clone().map(StoreGetReturn::new),
    };

    if let Some(saved) = &saved {
      let record = saved.data.clone();
      self.apply(move |items| merge_by_id(items, vec![record]))?;
    }
    Ok(saved)
  }

  async fn patch(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let input = opts.data.clone().unwrap_or_else(|| json!({}));
    let id = target_id(&opts);

    let saved = match &self.transport {
      Some(transport) => transport
        .patch(opts.clone())
        .await?
        .map(StoreGetReturn::from_response),
      None => Some(StoreGetReturn::new(input.clone())),
    };

    let fields = saved
      .as_ref()
      .map(|s| s.data.clone())
      .filter(Value::is_object)
      .unwrap_or(input);
    if let Some(id) = id.or_else(|| id_of(&fields)) {
      self.apply(|items| upsert(items, &id, &fields))?;
    }
    Ok(saved)
  }

  async fn delete(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let id = require_id(&opts, "delete")?;
    if let Some(transport) = &self.transport {
      transport.delete(opts.clone()).await?;
    }
    self.apply(|items| items.retain(|item| id_of(item).as_deref() != Some(id.as_str())))?;
    Ok(None)
  }

  async fn restore(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let id = require_id(&opts, "restore")?;

    let saved = match &self.transport {
      Some(transport) => {
        let mut request = opts.clone().with_id(&id).with_additional_url("restore");
        request.final_url = None;
        transport
          .patch(request)
          .await?
          .map(StoreGetReturn::from_response)
      }
      None => None,
    };

    let mut fields = json!({ "id": id, "isInactive": false });
    if let Some(saved) = saved.as_ref().filter(|s| s.data.is_object()) {
      merge_fields(&mut fields, &saved.data);
    }
    self.apply(|items| upsert(items, &id, &fields))?;

    // A restored record may predate the watermark, so pull everything again.
    let items = self.refresh(self.key(), opts.with_refresh(true), true).await?;
    Ok(
      items
        .into_iter()
        .find(|item| id_of(item).as_deref() == Some(id.as_str()))
        .map(StoreGetReturn::new)
        .or(saved),
    )
  }

  fn clear(&self) {
    self.collections().clear();
  }
}
