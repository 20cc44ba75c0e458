//! Per-request session cache.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::inflight::InFlight;
use super::local::LocalCache;
use super::types::{LocalMeta, LocallyStoredItem, StoreGetReturn};
use super::{require_id, target_id, Store, StoreSettings};
use crate::api::{PathOptions, Transport, Verb};
use crate::auth::Auth;
use crate::error::Result;
use crate::nav::Navigation;
use crate::util::{id_of, merge_fields};

type Entries = Arc<Mutex<HashMap<String, StoreGetReturn>>>;

/// Caches every response under `{store}_{user}_{path}`.
///
/// Reads are served from memory, then from the persisted cache while it is
/// fresh, and only then from the transport. Patches are fanned out to every
/// cached entry holding the patched id, so list and detail views agree.
pub struct SessionStore {
  name: String,
  navigation: Arc<Navigation>,
  auth: Arc<Auth>,
  transport: Option<Arc<dyn Transport>>,
  local: Option<Arc<dyn LocalCache>>,
  expiry: Duration,
  entries: Entries,
  inflight: InFlight<Result<Option<StoreGetReturn>>>,
}

impl SessionStore {
  pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

  pub fn new(settings: StoreSettings) -> Self {
    Self {
      name: settings.name,
      navigation: settings.navigation,
      auth: settings.auth,
      transport: settings.transport,
      local: settings.local,
      expiry: settings
        .expiry
        .unwrap_or_else(|| Duration::days(Self::DEFAULT_EXPIRY_DAYS)),
      entries: Arc::new(Mutex::new(HashMap::new())),
      inflight: InFlight::new(),
    }
  }

  /// Cache key for a request; computes and caches its final URL.
  pub fn key(&self, opts: &mut PathOptions) -> String {
    let url = opts.build_url(&self.navigation);
    format!(
      "{}_{}_{}",
      self.name,
      self.auth.user_id(),
      self.navigation.relative(&url)
    )
  }

  /// Key a single-item read of `id` would use.
  fn item_key(&self, opts: &PathOptions, id: &str) -> String {
    let mut item = opts.clone();
    item.id = Some(id.to_string());
    item.params = Default::default();
    item.final_url = None;
    self.key(&mut item)
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, StoreGetReturn>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Snapshot of a cached entry, without touching the transport.
  pub fn cached(&self, key: &str) -> Option<StoreGetReturn> {
    self.entries().get(key).cloned()
  }

  async fn read(&self, verb: Verb, mut opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    let key = self.key(&mut opts);

    if !opts.refresh {
      if let Some(hit) = self.cached(&key) {
        debug!(%key, "memory cache hit");
        return Ok(Some(hit));
      }

      if let Some(local) = &self.local {
        let stored = match local.get(&key) {
          Ok(stored) => stored,
          Err(e) if self.transport.is_some() => {
            warn!(%key, error = %e, "local cache read failed, fetching instead");
            None
          }
          Err(e) => return Err(e),
        };
        if let Some(stored) = stored {
          if self.transport.is_none() || stored.meta.is_fresh(self.expiry) {
            debug!(%key, "local cache hit");
            let envelope = stored.envelope();
            self.entries().insert(key, envelope.clone());
            return Ok(Some(envelope));
          }
          debug!(%key, "local cache entry is stale");
        }
      }
    }

    let Some(transport) = self.transport.clone() else {
      return Ok(None);
    };

    let entries = self.entries.clone();
    let local = self.local.clone();
    let fetch_key = key.clone();
    self
      .inflight
      .run(&key, move || fetch_and_cache(transport, verb, opts, entries, local, fetch_key))
      .await
  }

  /// Merge `fields` into the entry for `id` and into every entry containing it.
  fn apply_patch(&self, opts: &PathOptions, id: &str, fields: &Value) {
    let item_key = self.item_key(opts, id);

    let changed: Vec<(String, StoreGetReturn)> = {
      let mut entries = self.entries();
      entries
        .iter_mut()
        .filter_map(|(key, envelope)| {
          let touched = if *key == item_key {
            merge_fields(&mut envelope.data, fields);
            true
          } else {
            envelope.merge_matching(id, fields)
          };
          touched.then(|| (key.clone(), envelope.clone()))
        })
        .collect()
    };

    debug!(id, entries = changed.len(), "applied patch to cached entries");
    if let Some(local) = &self.local {
      for (key, envelope) in &changed {
        persist(local.as_ref(), key, envelope);
      }
    }
  }
}

async fn fetch_and_cache(
  transport: Arc<dyn Transport>,
  verb: Verb,
  opts: PathOptions,
  entries: Entries,
  local: Option<Arc<dyn LocalCache>>,
  key: String,
) -> Result<Option<StoreGetReturn>> {
  debug!(%key, "fetching from transport");
  let body = match verb {
    Verb::Get => transport.get(opts).await?,
    _ => transport.get_all(opts).await?,
  };
  let Some(body) = body else {
    return Ok(None);
  };

  let envelope = StoreGetReturn::from_response(body);
  entries
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
    .insert(key.clone(), envelope.clone());
  if let Some(local) = &local {
    persist(local.as_ref(), &key, &envelope);
  }
  Ok(Some(envelope))
}

fn persist(local: &dyn LocalCache, key: &str, envelope: &StoreGetReturn) {
  let item = LocallyStoredItem::new(LocalMeta::stored_now(), envelope);
  if let Err(e) = local.set(key, &item) {
    warn!(key, error = %e, "failed to persist cache entry");
  }
}

#[async_trait]
impl Store for SessionStore {
  fn name(&self) -> &str {
    &self.name
  }

  async fn get(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    self.read(Verb::Get, opts).await
  }

  async fn get_all(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    self.read(Verb::GetAll, opts).await
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
      if let Some(id) = id_of(&saved.data) {
        let key = self.item_key(&opts, &id);
        self.entries().insert(key.clone(), saved.clone());
        if let Some(local) = &self.local {
          persist(local.as_ref(), &key, saved);
        }
      }
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
    if let Some(id) = id {
      self.apply_patch(&opts, &id, &fields);
    }
    Ok(saved)
  }

  async fn delete(&self, mut opts: PathOptions) -> Result<Option<StoreGetReturn>> {
    if let Some(transport) = &self.transport {
      transport.delete(opts.clone()).await?;
    }

    // Only the entry for this item is dropped; lists still holding it are left
    // for the caller to refetch.
    let key = match target_id(&opts) {
      Some(id) => self.item_key(&opts, &id),
      None => self.key(&mut opts),
    };
    self.entries().remove(&key);
    if let Some(local) = &self.local {
      local.remove(&key)?;
    }
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
    self.apply_patch(&opts, &id, &fields);
    Ok(saved.or_else(|| Some(StoreGetReturn::new(fields))))
  }

  fn clear(&self) {
    self.entries().clear();
  }
}
