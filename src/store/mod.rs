//! Caching stores in front of a transport.
//!
//! Two strategies are available per navigation item:
//! - [`SessionStore`]: caches each response under its computed path, with
//!   identical concurrent reads coalesced into a single request
//! - [`WholeLastUpdatedStore`]: holds the whole collection and pulls only the
//!   records changed since the last refresh, merging them by id
//!
//! Both can be backed by a [`LocalCache`] so data survives restarts.

mod inflight;
mod local;
mod session;
mod types;
mod whole;

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::api::{PathOptions, Transport};
use crate::auth::Auth;
use crate::error::{ApiError, Result};
use crate::nav::{NavRef, Navigation, StoreMode};

pub use inflight::InFlight;
pub use local::{LocalCache, MemoryLocalCache, SqliteLocalCache};
pub use session::SessionStore;
pub use types::{LocalMeta, LocallyStoredItem, StoreGetReturn};
pub use whole::WholeLastUpdatedStore;

/// Common verb surface of every store.
#[async_trait]
pub trait Store: Send + Sync {
  fn name(&self) -> &str;

  async fn get(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  async fn get_all(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  async fn post(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  async fn patch(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  async fn delete(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  async fn restore(&self, opts: PathOptions) -> Result<Option<StoreGetReturn>>;

  /// Drop all in-memory state. Persisted entries are left alone.
  fn clear(&self);
}

/// Everything a store needs from its surroundings.
#[derive(Clone)]
pub struct StoreSettings {
  pub name: String,
  pub navigation: Arc<Navigation>,
  pub auth: Arc<Auth>,
  /// `None` makes a purely local store that never expires
  pub transport: Option<Arc<dyn Transport>>,
  pub local: Option<Arc<dyn LocalCache>>,
  /// Overrides the strategy's default freshness window
  pub expiry: Option<Duration>,
}

impl StoreSettings {
  pub fn new(name: impl Into<String>, navigation: Arc<Navigation>, auth: Arc<Auth>) -> Self {
    Self {
      name: name.into(),
      navigation,
      auth,
      transport: None,
      local: None,
      expiry: None,
    }
  }

  pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn with_local(mut self, local: Arc<dyn LocalCache>) -> Self {
    self.local = Some(local);
    self
  }

  pub fn with_expiry(mut self, expiry: Duration) -> Self {
    self.expiry = Some(expiry);
    self
  }
}

/// Builds and owns one store per store name.
pub struct StoreRegistry {
  navigation: Arc<Navigation>,
  auth: Arc<Auth>,
  transport: Option<Arc<dyn Transport>>,
  local: Option<Arc<dyn LocalCache>>,
  stores: Mutex<HashMap<String, Arc<dyn Store>>>,
}

impl StoreRegistry {
  pub fn new(
    navigation: Arc<Navigation>,
    auth: Arc<Auth>,
    transport: Option<Arc<dyn Transport>>,
    local: Option<Arc<dyn LocalCache>>,
  ) -> Self {
    Self {
      navigation,
      auth,
      transport,
      local,
      stores: Mutex::new(HashMap::new()),
    }
  }

  /// The store for a nav, created on first use from its navigation item.
  ///
  /// Unknown names get a plain session store without local persistence.
  pub fn store_for(&self, nav: &NavRef) -> Arc<dyn Store> {
    self.named_store(nav, None)
  }

  /// The store a request caches under: `path.store_name` when set, else its nav's.
  ///
  /// A named store still takes its strategy and expiry from the request's nav.
  pub fn store_for_path(&self, path: &PathOptions) -> Option<Arc<dyn Store>> {
    match (&path.nav, path.store_name.as_deref()) {
      (Some(nav), name) => Some(self.named_store(nav, name)),
      (None, Some(name)) => Some(self.named_store(&NavRef::from(name), Some(name))),
      (None, None) => None,
    }
  }

  fn named_store(&self, nav: &NavRef, store_name: Option<&str>) -> Arc<dyn Store> {
    let item = self.navigation.resolve(nav);
    let name = store_name
      .or_else(|| item.map(|i| i.name.as_str()))
      .unwrap_or_else(|| nav.name());

    let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(store) = stores.get(name) {
      return store.clone();
    }

    let mut settings = StoreSettings::new(name, self.navigation.clone(), self.auth.clone());
    settings.transport = self.transport.clone();
    let mode = item.map(|i| i.store).unwrap_or_default();
    if let Some(item) = item {
      if item.local_cache {
        settings.local = self.local.clone();
      }
      settings.expiry = item.expiry_hours.map(Duration::hours);
    }

    debug!(store = name, ?mode, "creating store");
    let store: Arc<dyn Store> = match mode {
      StoreMode::Session => Arc::new(SessionStore::new(settings)),
      StoreMode::WholeLastUpdated => Arc::new(WholeLastUpdatedStore::new(settings)),
    };
    stores.insert(name.to_string(), store.clone());
    store
  }

  /// Register a store built elsewhere, replacing any existing one of that name.
  pub fn insert(&self, store: Arc<dyn Store>) {
    self
      .stores
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(store.name().to_string(), store);
  }

  /// Drop every store's in-memory state, e.g. on logout.
  pub fn clear_all(&self) {
    for store in self.stores.lock().unwrap_or_else(PoisonError::into_inner).values() {
      store.clear();
    }
  }
}

/// The id a write targets: explicit `id`, else `data.id`.
pub(crate) fn target_id(opts: &PathOptions) -> Option<String> {
  opts
    .id
    .clone()
    .or_else(|| opts.data.as_ref().and_then(crate::util::id_of))
}

pub(crate) fn require_id(opts: &PathOptions, action: &str) -> Result<String> {
  target_id(opts).ok_or_else(|| ApiError::Local(format!("Cannot {} without an id", action)))
}
