//! The dependency container handed to every consumer of the library.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::action::{ActionOptions, ActionTracker, Actions};
use crate::api::{Api, DemoApiGroup, DemoTransport, HttpTransport, Transport};
use crate::auth::Auth;
use crate::error::Result;
use crate::nav::{NavRef, Navigation};
use crate::store::{LocalCache, Store, StoreRegistry};

/// Header carrying the tenant (proxy) id unless configured otherwise.
pub const DEFAULT_TENANT_HEADER: &str = "X-Proxy-Id";

/// Shared navigation, auth, transport, stores and actions for one session.
pub struct DataContext {
  navigation: Arc<Navigation>,
  auth: Arc<Auth>,
  api: Arc<Api>,
  stores: Arc<StoreRegistry>,
  actions: Actions,
}

impl DataContext {
  pub fn builder(navigation: Navigation, auth: Auth) -> DataContextBuilder {
    DataContextBuilder {
      navigation,
      auth,
      tenant_header: DEFAULT_TENANT_HEADER.to_string(),
      demo_groups: Vec::new(),
      demo_delay: None,
      demoing: false,
      local: None,
    }
  }

  /// Replace the options layered under every action's own.
  pub fn with_action_defaults(mut self, defaults: ActionOptions) -> Self {
    self.actions = self.actions.with_defaults(defaults);
    self
  }

  pub fn navigation(&self) -> &Arc<Navigation> {
    &self.navigation
  }

  pub fn auth(&self) -> &Arc<Auth> {
    &self.auth
  }

  pub fn api(&self) -> &Arc<Api> {
    &self.api
  }

  pub fn actions(&self) -> &Actions {
    &self.actions
  }

  pub fn tracker(&self) -> &Arc<ActionTracker> {
    self.actions.tracker()
  }

  pub fn store(&self, nav: impl Into<NavRef>) -> Arc<dyn Store> {
    self.stores.store_for(&nav.into())
  }

  pub fn is_demoing(&self) -> bool {
    self.api.demo().is_some_and(|d| d.is_demoing())
  }

  /// Toggle demo mode. Cached data from the other mode is dropped.
  pub fn set_demoing(&self, demoing: bool) {
    if let Some(demo) = self.api.demo() {
      demo.set_demoing(demoing);
      self.stores.clear_all();
    }
  }

  /// Forget credentials and every store's in-memory data.
  pub fn logout(&self) {
    self.auth.logout();
    self.stores.clear_all();
    self.tracker().clear_messages();
    info!("logged out");
  }
}

pub struct DataContextBuilder {
  navigation: Navigation,
  auth: Auth,
  tenant_header: String,
  demo_groups: Vec<DemoApiGroup>,
  demo_delay: Option<Duration>,
  demoing: bool,
  local: Option<Arc<dyn LocalCache>>,
}

impl DataContextBuilder {
  pub fn tenant_header(mut self, header: impl Into<String>) -> Self {
    self.tenant_header = header.into();
    self
  }

  /// Register demo fixtures. `demoing` decides whether they answer from the start.
  pub fn demo(mut self, groups: Vec<DemoApiGroup>, demoing: bool) -> Self {
    self.demo_groups = groups;
    self.demoing = demoing;
    self
  }

  pub fn demo_delay(mut self, delay: Duration) -> Self {
    self.demo_delay = Some(delay);
    self
  }

  pub fn local_cache(mut self, local: Arc<dyn LocalCache>) -> Self {
    self.local = Some(local);
    self
  }

  pub fn build(self) -> Result<DataContext> {
    let navigation = Arc::new(self.navigation);
    let auth = Arc::new(self.auth);

    let http = HttpTransport::new(navigation.clone(), auth.clone(), self.tenant_header)?;
    let demo = if self.demo_groups.is_empty() && !self.demoing {
      None
    } else {
      let mut demo = DemoTransport::new(navigation.clone());
      if let Some(delay) = self.demo_delay {
        demo = demo.with_delay(delay);
      }
      for group in self.demo_groups {
        demo.add_group(group);
      }
      demo.set_demoing(self.demoing);
      Some(Arc::new(demo))
    };
    let api = Arc::new(Api::new(http, demo));

    let transport: Arc<dyn Transport> = api.clone();
    let stores = Arc::new(StoreRegistry::new(
      navigation.clone(),
      auth.clone(),
      Some(transport.clone()),
      self.local,
    ));
    let actions = Actions::new(stores.clone(), transport, Arc::new(ActionTracker::new()));

    Ok(DataContext {
      navigation,
      auth,
      api,
      stores,
      actions,
    })
  }
}
