//! CRUD actions wrapped with guards, hooks and shared messaging.
//!
//! Each action runs the same pipeline:
//! 1. merge the call's options over the component and context defaults
//! 2. pick an implementation: the `on_run` hook, a store, or an in-memory list
//! 3. run the `on_can` guard, which may block the action with a message
//! 4. run the implementation, then the `on_success` hook
//! 5. report through the [`ActionTracker`]

mod options;
mod tracker;

use serde_json::{json, Value};
use std::sync::{Arc, PoisonError};
use tracing::debug;

use crate::api::{PathOptions, Transport};
use crate::error::{ApiError, Result};
use crate::store::{require_id, Store, StoreGetReturn, StoreRegistry};
use crate::util::{id_of, merge_fields};

pub use options::{
  ActionKind, ActionOptions, GuardHook, ItemRequest, RunHook, SaveMode, SharedItems, SuccessHook,
};
pub use tracker::{ActionTracker, DoActionSettings, ErrorHook};

enum Implementation {
  Hook(RunHook),
  Store(Arc<dyn Store>),
  Items(SharedItems),
}

/// Entry point for every data action.
pub struct Actions {
  stores: Arc<StoreRegistry>,
  transport: Arc<dyn Transport>,
  tracker: Arc<ActionTracker>,
  defaults: ActionOptions,
}

impl Actions {
  pub fn new(
    stores: Arc<StoreRegistry>,
    transport: Arc<dyn Transport>,
    tracker: Arc<ActionTracker>,
  ) -> Self {
    Self {
      stores,
      transport,
      tracker,
      defaults: ActionOptions::default(),
    }
  }

  /// Options applied underneath every call's own options.
  pub fn with_defaults(mut self, defaults: ActionOptions) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn tracker(&self) -> &Arc<ActionTracker> {
    &self.tracker
  }

  pub async fn delete_item(&self, req: impl Into<ItemRequest>) -> Result<Option<StoreGetReturn>> {
    self.run(ActionKind::Delete, req.into()).await
  }

  pub async fn get_item(&self, req: impl Into<ItemRequest>) -> Result<Option<StoreGetReturn>> {
    self.run(ActionKind::Get, req.into()).await
  }

  pub async fn get_all_items(&self, req: impl Into<ItemRequest>) -> Result<Option<StoreGetReturn>> {
    self.run(ActionKind::GetAll, req.into()).await
  }

  pub async fn restore_item(&self, req: impl Into<ItemRequest>) -> Result<Option<StoreGetReturn>> {
    self.run(ActionKind::Restore, req.into()).await
  }

  /// POST new items, PATCH existing ones.
  ///
  /// Without an explicit mode, an item with no `data.id` is treated as new.
  pub async fn save_item(&self, req: impl Into<ItemRequest>) -> Result<Option<StoreGetReturn>> {
    let mut req = req.into();
    if req.mode.is_none() {
      let has_id = req.path.data.as_ref().and_then(id_of).is_some();
      req.mode = Some(if has_id { SaveMode::Edit } else { SaveMode::New });
    }
    self.run(ActionKind::Save, req).await
  }

  /// Raw GET through the transport, skipping the stores.
  pub async fn api_get(&self, req: impl Into<ItemRequest>) -> Result<Option<Value>> {
    let req = req.into();
    let options = ActionOptions::resolve(&[&req.options, &self.defaults], ActionKind::ApiGet);
    self
      .tracker
      .do_action(&options.tracker_settings(), self.transport.get(req.path))
      .await
  }

  /// Raw POST through the transport, skipping the stores.
  pub async fn api_post(&self, req: impl Into<ItemRequest>) -> Result<Option<Value>> {
    let req = req.into();
    let options = ActionOptions::resolve(&[&req.options, &self.defaults], ActionKind::ApiPost);
    self
      .tracker
      .do_action(&options.tracker_settings(), self.transport.post(req.path))
      .await
  }

  fn implementation(&self, options: &ActionOptions, path: &PathOptions) -> Option<Implementation> {
    if let Some(hook) = &options.on_run {
      return Some(Implementation::Hook(hook.clone()));
    }
    if let Some(store) = &options.store {
      return Some(Implementation::Store(store.clone()));
    }
    if let Some(store) = self.stores.store_for_path(path) {
      return Some(Implementation::Store(store));
    }
    options.items.clone().map(Implementation::Items)
  }

  async fn run(&self, kind: ActionKind, req: ItemRequest) -> Result<Option<StoreGetReturn>> {
    let options = ActionOptions::resolve(&[&req.options, &self.defaults], kind);
    let settings = options.tracker_settings();
    let path = req.path;

    let Some(implementation) = self.implementation(&options, &path) else {
      let error = ApiError::Local(format!("No store or items to {:?}", kind));
      return self.tracker.do_action(&settings, async { Err(error) }).await;
    };

    if let Some(guard) = &options.on_can {
      if let Some(message) = guard(path.clone()).await {
        debug!(?kind, %message, "action blocked");
        self.tracker.set_error(message);
        return Ok(None);
      }
    }

    let mode = req.mode.unwrap_or(SaveMode::New);
    let on_success = options.on_success.clone();
    self
      .tracker
      .do_action(&settings, async move {
        let result = match implementation {
          Implementation::Hook(hook) => hook(path).await?,
          Implementation::Store(store) => run_store(store.as_ref(), kind, mode, path).await?,
          Implementation::Items(items) => run_items(&items, kind, mode, path)?,
        };
        match on_success {
          Some(hook) => hook(result).await,
          None => Ok(result),
        }
      })
      .await
  }
}

async fn run_store(
  store: &dyn Store,
  kind: ActionKind,
  mode: SaveMode,
  path: PathOptions,
) -> Result<Option<StoreGetReturn>> {
  match (kind, mode) {
    (ActionKind::Delete, _) => store.delete(path).await,
    (ActionKind::Get, _) => store.get(path).await,
    (ActionKind::GetAll, _) => store.get_all(path).await,
    (ActionKind::Restore, _) => store.restore(path).await,
    (ActionKind::Save, SaveMode::New) => store.post(path).await,
    (ActionKind::Save, SaveMode::Edit) => store.patch(path).await,
    (ActionKind::ApiGet | ActionKind::ApiPost, _) => Err(ApiError::Local(format!(
      "{:?} does not go through a store",
      kind
    ))),
  }
}

fn run_items(
  items: &SharedItems,
  kind: ActionKind,
  mode: SaveMode,
  path: PathOptions,
) -> Result<Option<StoreGetReturn>> {
  fn position(items: &[Value], id: &str) -> Option<usize> {
    items.iter().position(|i| id_of(i).as_deref() == Some(id))
  }

  let mut items = items.lock().unwrap_or_else(PoisonError::into_inner);

  match (kind, mode) {
    (ActionKind::GetAll, _) => Ok(Some(StoreGetReturn::list(items.clone()))),
    (ActionKind::Get, _) => {
      let id = require_id(&path, "get")?;
      Ok(position(&items, &id).map(|i| StoreGetReturn::new(items[i].clone())))
    }
    (ActionKind::Delete, _) => {
      let id = require_id(&path, "delete")?;
      items.retain(|item| id_of(item).as_deref() != Some(id.as_str()));
      Ok(None)
    }
    (ActionKind::Restore, _) => {
      let id = require_id(&path, "restore")?;
      Ok(position(&items, &id).map(|i| {
        merge_fields(&mut items[i], &json!({ "isInactive": false }));
        StoreGetReturn::new(items[i].clone())
      }))
    }
    (ActionKind::Save, mode) => {
      let data = path
        .data
        .clone()
        .ok_or_else(|| ApiError::Local("Nothing to save".to_string()))?;
      let existing = match mode {
        SaveMode::Edit => require_id(&path, "save").ok().and_then(|id| position(&items, &id)),
        SaveMode::New => None,
      };
      match existing {
        Some(i) => {
          merge_fields(&mut items[i], &data);
          Ok(Some(StoreGetReturn::new(items[i].clone())))
        }
        None => {
          items.push(data.clone());
          Ok(Some(StoreGetReturn::new(data)))
        }
      }
    }
    (ActionKind::ApiGet | ActionKind::ApiPost, _) => Err(ApiError::Local(format!(
      "{:?} does not use local items",
      kind
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::mock::MockTransport;
  use crate::api::Verb;
  use crate::auth::Auth;
  use crate::nav::{Navigation, NavigationItem};
  use futures::FutureExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  fn actions(transport: Arc<MockTransport>) -> Actions {
    let navigation = Arc::new(Navigation::new(
      "https://api.example.com",
      vec![NavigationItem::new("cars")],
    ));
    let stores = Arc::new(StoreRegistry::new(
      navigation,
      Arc::new(Auth::new(true)),
      Some(transport.clone()),
      None,
    ));
    Actions::new(stores, transport, Arc::new(ActionTracker::new()))
  }

  fn echo() -> Arc<MockTransport> {
    Arc::new(MockTransport::new(|verb, opts| match verb {
      Verb::Post | Verb::Patch => Ok(opts.data.clone()),
      Verb::Get => Ok(Some(json!({"id": opts.id, "model": "suv"}))),
      _ => Ok(None),
    }))
  }

  #[tokio::test]
  async fn test_guard_blocks_delete() {
    let transport = echo();
    let actions = actions(transport.clone());
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = runs.clone();

    let options = ActionOptions::new()
      .on_can(|_| async { Some("Cannot delete a car in use".to_string()) }.boxed())
      .on_run(move |_| {
        hook_runs.fetch_add(1, Ordering::SeqCst);
        async { Ok(None) }.boxed()
      });
    let result = actions
      .delete_item(ItemRequest::new(PathOptions::new("cars").with_id("1")).with_options(options))
      .await;

    assert_eq!(result, Ok(None));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls(), 0);
    assert_eq!(
      actions.tracker().error_message().as_deref(),
      Some("Cannot delete a car in use")
    );
  }

  #[tokio::test]
  async fn test_save_infers_post_or_patch() {
    let transport = echo();
    let actions = actions(transport.clone());

    actions
      .save_item(PathOptions::new("cars").with_data(json!({"model": "van"})))
      .await
      .unwrap();
    assert_eq!(transport.last_request().unwrap().0, Verb::Post);

    actions
      .save_item(PathOptions::new("cars").with_data(json!({"id": null, "model": "van"})))
      .await
      .unwrap();
    assert_eq!(transport.last_request().unwrap().0, Verb::Post);

    actions
      .save_item(PathOptions::new("cars").with_data(json!({"id": 4, "model": "van"})))
      .await
      .unwrap();
    assert_eq!(transport.last_request().unwrap().0, Verb::Patch);

    actions
      .save_item(
        ItemRequest::new(PathOptions::new("cars").with_data(json!({"id": 4})))
          .with_mode(SaveMode::New),
      )
      .await
      .unwrap();
    assert_eq!(transport.last_request().unwrap().0, Verb::Post);
  }

  #[tokio::test]
  async fn test_success_hook_transforms_result() {
    let actions = actions(echo());
    let options = ActionOptions::new().on_success(|result| {
      async move {
        Ok(result.map(|mut r| {
          r.data["seen"] = json!(true);
          r
        }))
      }
      .boxed()
    });

    let result = actions
      .get_item(ItemRequest::new(PathOptions::new("cars").with_id("1")).with_options(options))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(result.data, json!({"id": "1", "model": "suv", "seen": true}));
  }

  #[tokio::test]
  async fn test_errors_recorded_when_not_thrown() {
    let transport = Arc::new(MockTransport::new(|_, _| {
      Err(ApiError::Http {
        code: 500,
        name: "Internal Server Error".to_string(),
        message: "database offline".to_string(),
      })
    }));
    let actions = actions(transport);
    let options = ActionOptions::new()
      .with_throw_error(false)
      .with_complete_msg("Saved");

    let result = actions
      .save_item(
        ItemRequest::new(PathOptions::new("cars").with_data(json!({"id": "1"})))
          .with_options(options),
      )
      .await;
    assert_eq!(result, Ok(None));
    assert_eq!(
      actions.tracker().error_message().as_deref(),
      Some("database offline")
    );
    assert_eq!(actions.tracker().completion_message(), None);
    assert!(!actions.tracker().is_loading());
  }

  #[tokio::test]
  async fn test_items_fallback() {
    let actions = actions(echo());
    let items: SharedItems = Arc::new(Mutex::new(vec![
      json!({"id": "1", "model": "suv", "isInactive": true}),
      json!({"id": "2", "model": "sedan"}),
    ]));
    let request = |path: PathOptions| {
      ItemRequest::new(path).with_options(ActionOptions::new().with_items(items.clone()))
    };

    actions
      .save_item(request(PathOptions::default().with_data(json!({"id": "2", "model": "coupe"}))))
      .await
      .unwrap();
    actions
      .save_item(request(PathOptions::default().with_data(json!({"model": "van"}))))
      .await
      .unwrap();
    let restored = actions
      .restore_item(request(PathOptions::default().with_id("1")))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(restored.data["isInactive"], json!(false));
    actions
      .delete_item(request(PathOptions::default().with_id("1")))
      .await
      .unwrap();

    let all = actions
      .get_all_items(request(PathOptions::default()))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(
      all.data,
      json!([{"id": "2", "model": "coupe"}, {"model": "van"}])
    );
  }

  #[tokio::test]
  async fn test_store_name_keeps_a_separate_cache() {
    let transport = echo();
    let actions = actions(transport.clone());
    let fleet = || PathOptions::new("cars").with_id("1").with_store_name("fleet");

    actions.get_item(fleet()).await.unwrap();
    actions.get_item(PathOptions::new("cars").with_id("1")).await.unwrap();
    assert_eq!(transport.calls(), 2);

    actions.get_item(fleet()).await.unwrap();
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_missing_implementation_is_an_error() {
    let actions = actions(echo());
    let result = actions.get_all_items(PathOptions::default()).await;
    assert!(matches!(result, Err(ApiError::Local(_))));
  }

  #[tokio::test]
  async fn test_api_get_bypasses_stores() {
    let transport = echo();
    let actions = actions(transport.clone());
    let body = actions
      .api_get(PathOptions::for_url("cars/summary").with_id("7"))
      .await
      .unwrap();
    assert_eq!(body, Some(json!({"id": "7", "model": "suv"})));
    assert_eq!(transport.calls(), 1);
  }
}
