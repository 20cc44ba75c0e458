//! Per-action options, merged from ordered layers.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::tracker::{DoActionSettings, ErrorHook};
use crate::api::PathOptions;
use crate::error::Result;
use crate::store::{Store, StoreGetReturn};

/// In-memory list used when an action has neither a store nor a nav.
pub type SharedItems = Arc<Mutex<Vec<Value>>>;

/// Returns `Some(message)` to block the action.
pub type GuardHook = Arc<dyn Fn(PathOptions) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Replaces the store call entirely.
pub type RunHook =
  Arc<dyn Fn(PathOptions) -> BoxFuture<'static, Result<Option<StoreGetReturn>>> + Send + Sync>;

/// Sees (and may replace) the result of a successful run.
pub type SuccessHook = Arc<
  dyn Fn(Option<StoreGetReturn>) -> BoxFuture<'static, Result<Option<StoreGetReturn>>> + Send + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
  New,
  Edit,
}

/// The action kinds, used for literal default messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
  Delete,
  Get,
  GetAll,
  Restore,
  Save,
  ApiGet,
  ApiPost,
}

impl ActionKind {
  fn loading_msg(self) -> &'static str {
    match self {
      ActionKind::Delete => "Deleting",
      ActionKind::Get | ActionKind::GetAll | ActionKind::ApiGet => "Loading",
      ActionKind::Restore => "Restoring",
      ActionKind::Save | ActionKind::ApiPost => "Saving",
    }
  }
}

/// Behaviour and messaging for one action.
///
/// Every field is optional so several layers (call site, component,
/// context-wide defaults) can be stacked with [`ActionOptions::merge`].
#[derive(Clone, Default)]
pub struct ActionOptions {
  pub loading_msg: Option<String>,
  pub complete_msg: Option<String>,
  pub throw_error: Option<bool>,
  pub store: Option<Arc<dyn Store>>,
  pub items: Option<SharedItems>,
  pub on_can: Option<GuardHook>,
  pub on_run: Option<RunHook>,
  pub on_success: Option<SuccessHook>,
  pub on_error: Option<ErrorHook>,
}

macro_rules! first_some {
  ($layers:expr, $field:ident) => {
    $layers.iter().find_map(|layer| layer.$field.clone())
  };
}

impl ActionOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take the first `Some` of every field across `layers`, in order.
  pub fn merge(layers: &[&ActionOptions]) -> ActionOptions {
    ActionOptions {
      loading_msg: first_some!(layers, loading_msg),
      complete_msg: first_some!(layers, complete_msg),
      throw_error: first_some!(layers, throw_error),
      store: first_some!(layers, store),
      items: first_some!(layers, items),
      on_can: first_some!(layers, on_can),
      on_run: first_some!(layers, on_run),
      on_success: first_some!(layers, on_success),
      on_error: first_some!(layers, on_error),
    }
  }

  /// Merge `layers` and fill the remaining gaps with the literal defaults for `kind`.
  pub fn resolve(layers: &[&ActionOptions], kind: ActionKind) -> ActionOptions {
    let mut merged = Self::merge(layers);
    merged
      .loading_msg
      .get_or_insert_with(|| kind.loading_msg().to_string());
    merged.throw_error.get_or_insert(true);
    merged
  }

  pub fn tracker_settings(&self) -> DoActionSettings {
    DoActionSettings {
      loading_msg: self.loading_msg.clone().filter(|m| !m.is_empty()),
      complete_msg: self.complete_msg.clone(),
      throw_error: self.throw_error.unwrap_or(true),
      on_error: self.on_error.clone(),
    }
  }

  pub fn with_loading_msg(mut self, msg: impl Into<String>) -> Self {
    self.loading_msg = Some(msg.into());
    self
  }

  pub fn with_complete_msg(mut self, msg: impl Into<String>) -> Self {
    self.complete_msg = Some(msg.into());
    self
  }

  pub fn with_throw_error(mut self, throw_error: bool) -> Self {
    self.throw_error = Some(throw_error);
    self
  }

  pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn with_items(mut self, items: SharedItems) -> Self {
    self.items = Some(items);
    self
  }

  pub fn on_can<F>(mut self, f: F) -> Self
  where
    F: Fn(PathOptions) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
  {
    self.on_can = Some(Arc::new(f));
    self
  }

  pub fn on_run<F>(mut self, f: F) -> Self
  where
    F: Fn(PathOptions) -> BoxFuture<'static, Result<Option<StoreGetReturn>>> + Send + Sync + 'static,
  {
    self.on_run = Some(Arc::new(f));
    self
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<StoreGetReturn>) -> BoxFuture<'static, Result<Option<StoreGetReturn>>>
      + Send
      + Sync
      + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&crate::error::ApiError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }
}

/// One call into the action layer.
#[derive(Clone, Default)]
pub struct ItemRequest {
  pub path: PathOptions,
  /// Only read by `save_item`; inferred from `data.id` when absent
  pub mode: Option<SaveMode>,
  pub options: ActionOptions,
}

impl ItemRequest {
  pub fn new(path: PathOptions) -> Self {
    Self {
      path,
      mode: None,
      options: ActionOptions::default(),
    }
  }

  pub fn with_mode(mut self, mode: SaveMode) -> Self {
    self.mode = Some(mode);
    self
  }

  pub fn with_options(mut self, options: ActionOptions) -> Self {
    self.options = options;
    self
  }
}

impl From<PathOptions> for ItemRequest {
  fn from(path: PathOptions) -> Self {
    Self::new(path)
  }
}
