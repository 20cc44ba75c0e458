//! In-memory mock transport for demos and offline trials.
//!
//! Requests are answered from named groups of fixture data, after a short
//! artificial delay so callers never get a synchronous answer.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::{PathOptions, Transport, Verb};
use crate::error::{ApiError, Result};
use crate::nav::{NavRef, Navigation};
use crate::util::{id_of, merge_fields};

/// Custom handler for one verb, operating directly on the group's data.
pub type DemoAction = Arc<dyn Fn(&PathOptions, &mut Vec<Value>) -> Result<Option<Value>> + Send + Sync>;

/// Optional per-verb overrides of the default in-memory behavior.
#[derive(Clone, Default)]
pub struct DemoActions {
  pub get: Option<DemoAction>,
  pub get_all: Option<DemoAction>,
  pub post: Option<DemoAction>,
  pub patch: Option<DemoAction>,
  pub delete: Option<DemoAction>,
}

impl DemoActions {
  fn for_verb(&self, verb: Verb) -> Option<&DemoAction> {
    match verb {
      Verb::Get => self.get.as_ref(),
      Verb::GetAll => self.get_all.as_ref(),
      Verb::Post => self.post.as_ref(),
      Verb::Patch => self.patch.as_ref(),
      Verb::Delete => self.delete.as_ref(),
    }
  }
}

/// A named collection of fixture data answering one API resource.
#[derive(Clone, Default, Deserialize)]
pub struct DemoApiGroup {
  /// Nav names this group answers to
  #[serde(deserialize_with = "one_or_many")]
  pub nav: Vec<String>,
  /// Exact path match, tried before the nav names
  #[serde(default)]
  pub path: Option<String>,
  #[serde(default)]
  pub data: Vec<Value>,
  #[serde(skip)]
  pub actions: DemoActions,
  /// Actions keyed by normalized `additional_url`
  #[serde(skip)]
  pub sub_actions: HashMap<String, DemoActions>,
}

impl DemoApiGroup {
  pub fn new(nav: impl Into<String>, data: Vec<Value>) -> Self {
    Self {
      nav: vec![nav.into()],
      data,
      ..Self::default()
    }
  }

  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = Some(path.into());
    self
  }

  pub fn with_actions(mut self, actions: DemoActions) -> Self {
    self.actions = actions;
    self
  }

  pub fn with_sub_actions(mut self, additional_url: &str, actions: DemoActions) -> Self {
    self.sub_actions.insert(normalize_key(additional_url), actions);
    self
  }

  fn answers_to(&self, nav: &str) -> bool {
    self.nav.iter().any(|n| n.eq_ignore_ascii_case(nav))
  }
}

#[derive(Deserialize)]
struct DemoFixtures {
  groups: Vec<DemoApiGroup>,
}

/// Parse fixture groups from YAML (`groups: [{nav, path, data}]`).
pub fn parse_fixtures(yaml: &str) -> Result<Vec<DemoApiGroup>> {
  serde_yaml::from_str::<DemoFixtures>(yaml)
    .map(|f| f.groups)
    .map_err(|e| ApiError::Parse(format!("Invalid demo fixtures: {}", e)))
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(String),
    Many(Vec<String>),
  }

  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(s) => vec![s],
    OneOrMany::Many(v) => v,
  })
}

fn normalize_key(additional_url: &str) -> String {
  additional_url.trim_matches('/').to_lowercase()
}

/// Transport that answers from in-memory demo groups.
pub struct DemoTransport {
  navigation: Arc<Navigation>,
  groups: Mutex<Vec<DemoApiGroup>>,
  demoing: AtomicBool,
  delay: Duration,
}

impl DemoTransport {
  pub fn new(navigation: Arc<Navigation>) -> Self {
    Self {
      navigation,
      groups: Mutex::new(Vec::new()),
      demoing: AtomicBool::new(false),
      delay: Duration::from_millis(200),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn with_group(self, group: DemoApiGroup) -> Self {
    self.add_group(group);
    self
  }

  pub fn add_group(&self, group: DemoApiGroup) {
    self
      .groups
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(group);
  }

  pub fn is_demoing(&self) -> bool {
    self.demoing.load(Ordering::Relaxed)
  }

  pub fn set_demoing(&self, demoing: bool) {
    debug!(demoing, "demo mode toggled");
    self.demoing.store(demoing, Ordering::Relaxed);
  }

  /// Snapshot of a group's current data, looked up by nav name.
  pub fn data_for(&self, nav: &str) -> Option<Vec<Value>> {
    self
      .groups
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .find(|g| g.answers_to(nav))
      .map(|g| g.data.clone())
  }

  async fn handle(&self, verb: Verb, opts: PathOptions) -> Result<Option<Value>> {
    tokio::time::sleep(self.delay).await;

    match self.respond(verb, &opts) {
      Err(e) if verb.is_read() && !opts.throw_error && !e.is_unauthorized() => {
        warn!(error = %e, "demo request failed, returning nothing");
        Ok(None)
      }
      other => other,
    }
  }

  fn respond(&self, verb: Verb, opts: &PathOptions) -> Result<Option<Value>> {
    let base_path = opts.base_path(&self.navigation);
    let nav_name = opts.nav.as_ref().map(NavRef::name);

    let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
    let index = groups
      .iter()
      .position(|g| {
        g.path
          .as_deref()
          .is_some_and(|p| self.navigation.absolute(p).trim_end_matches('/') == base_path)
      })
      .or_else(|| nav_name.and_then(|n| groups.iter().position(|g| g.answers_to(n))))
      .ok_or_else(|| ApiError::NotFound(format!("No demo data for {}", base_path)))?;
    let group = &mut groups[index];

    debug!(?verb, path = %base_path, "demo request");

    let sub_action = opts
      .additional_url
      .as_deref()
      .map(normalize_key)
      .filter(|k| !k.is_empty())
      .and_then(|k| group.sub_actions.get(&k))
      .and_then(|actions| actions.for_verb(verb))
      .cloned();
    let action = sub_action.or_else(|| group.actions.for_verb(verb).cloned());

    match action {
      Some(action) => action(opts, &mut group.data),
      None => default_verb(verb, opts, &mut group.data),
    }
  }
}

/// In-memory CRUD used when a group has no custom action for the verb.
fn default_verb(verb: Verb, opts: &PathOptions, data: &mut Vec<Value>) -> Result<Option<Value>> {
  let target_id = opts
    .id
    .clone()
    .or_else(|| opts.data.as_ref().and_then(id_of));

  match verb {
    Verb::Get if opts.id.is_some() => Ok(
      data
        .iter()
        .find(|item| id_of(item) == opts.id)
        .map(|item| json!({ "data": item })),
    ),
    Verb::Get | Verb::GetAll => Ok(Some(json!({ "data": data, "count": data.len() }))),
    Verb::Post => {
      let mut item = opts.data.clone().unwrap_or_else(|| json!({}));
      if id_of(&item).is_none() {
        if let Some(obj) = item.as_object_mut() {
          obj.insert("id".to_string(), Value::String(next_id(data)));
        }
      }
      data.push(item.clone());
      Ok(Some(item))
    }
    Verb::Patch => {
      let patch = opts.data.clone().unwrap_or_else(|| json!({}));
      match data.iter_mut().find(|item| id_of(item) == target_id) {
        Some(item) => {
          merge_fields(item, &patch);
          Ok(Some(item.clone()))
        }
        None => Ok(None),
      }
    }
    Verb::Delete => {
      data.retain(|item| id_of(item) != target_id);
      Ok(None)
    }
  }
}

/// Smallest sequential id, starting after the collection length, not already taken.
fn next_id(data: &[Value]) -> String {
  let mut n = data.len() + 1;
  while data.iter().any(|item| id_of(item) == Some(n.to_string())) {
    n += 1;
  }
  n.to_string()
}

#[async_trait]
impl Transport for DemoTransport {
  async fn get(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.handle(Verb::Get, opts).await
  }

  async fn get_all(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.handle(Verb::GetAll, opts).await
  }

  async fn post(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.handle(Verb::Post, opts).await
  }

  async fn patch(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.handle(Verb::Patch, opts).await
  }

  async fn delete(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.handle(Verb::Delete, opts).await
  }

  async fn upload_image(
    &self,
    opts: PathOptions,
    file_name: &str,
    _bytes: Vec<u8>,
  ) -> Result<Option<Value>> {
    tokio::time::sleep(self.delay).await;
    let path = opts.base_path(&self.navigation);
    Ok(Some(json!({ "data": format!("{}/{}", path, file_name) })))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::Instant;

  fn cars() -> DemoApiGroup {
    DemoApiGroup::new(
      "cars",
      vec![
        json!({"id": "1", "model": "suv"}),
        json!({"id": "2", "model": "sedan"}),
      ],
    )
  }

  fn demo(group: DemoApiGroup) -> DemoTransport {
    DemoTransport::new(Arc::new(Navigation::new("https://api.example.com", Vec::new())))
      .with_group(group)
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_by_id_after_delay() {
    let demo = demo(cars());
    let started = Instant::now();

    let found = demo.get(PathOptions::new("cars").with_id("2")).await.unwrap();
    assert_eq!(found, Some(json!({"data": {"id": "2", "model": "sedan"}})));
    assert!(started.elapsed() >= Duration::from_millis(200));

    let missing = demo.get(PathOptions::new("cars").with_id("9")).await.unwrap();
    assert_eq!(missing, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_get_all_returns_everything() {
    let demo = demo(cars());
    let all = demo.get_all(PathOptions::new("cars")).await.unwrap().unwrap();
    assert_eq!(all["count"], json!(2));
    assert_eq!(all["data"].as_array().map(Vec::len), Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_post_assigns_sequential_id() {
    let demo = demo(cars());
    let saved = demo
      .post(PathOptions::new("cars").with_data(json!({"model": "coupe"})))
      .await
      .unwrap();
    assert_eq!(saved, Some(json!({"id": "3", "model": "coupe"})));
    assert_eq!(demo.data_for("cars").map(|d| d.len()), Some(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_patch_and_delete_by_id() {
    let demo = demo(cars());
    let patched = demo
      .patch(PathOptions::new("cars").with_data(json!({"id": "1", "model": "truck"})))
      .await
      .unwrap();
    assert_eq!(patched, Some(json!({"id": "1", "model": "truck"})));

    demo.delete(PathOptions::new("cars").with_id("2")).await.unwrap();
    assert_eq!(
      demo.data_for("cars"),
      Some(vec![json!({"id": "1", "model": "truck"})])
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_path_match_wins_over_nav() {
    let demo = demo(cars())
      .with_group(DemoApiGroup::new("other", vec![json!({"id": "1", "model": "boat"})]).with_path("v2/cars"));

    let mut opts = PathOptions::for_url("v2/cars").with_id("1");
    opts.nav = Some("cars".into());
    let found = demo.get(opts).await.unwrap();
    assert_eq!(found, Some(json!({"data": {"id": "1", "model": "boat"}})));
  }

  #[tokio::test(start_paused = true)]
  async fn test_sub_action_keyed_by_additional_url() {
    let archive: DemoAction = Arc::new(|opts: &PathOptions, data: &mut Vec<Value>| -> Result<Option<Value>> {
      let id = opts.id.clone();
      for item in data.iter_mut().filter(|item| id_of(item) == id) {
        merge_fields(item, &json!({"isInactive": false}));
      }
      Ok(Some(json!({"restored": id})))
    });
    let group = cars().with_sub_actions(
      "/Restore/",
      DemoActions {
        patch: Some(archive),
        ..DemoActions::default()
      },
    );
    let demo = demo(group);

    let result = demo
      .patch(PathOptions::new("cars").with_additional_url("restore").with_id("1"))
      .await
      .unwrap();
    assert_eq!(result, Some(json!({"restored": "1"})));
    assert_eq!(demo.data_for("cars").unwrap()[0]["isInactive"], json!(false));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unknown_group() {
    let demo = demo(cars());
    let err = demo.get_all(PathOptions::new("boats")).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let quiet = demo
      .get_all(PathOptions::new("boats").with_throw_error(false))
      .await
      .unwrap();
    assert_eq!(quiet, None);
  }

  fn failing_get(error: ApiError) -> DemoApiGroup {
    let action: DemoAction = Arc::new(move |_: &PathOptions, _: &mut Vec<Value>| -> Result<Option<Value>> {
      Err(error.clone())
    });
    cars().with_actions(DemoActions {
      get: Some(action),
      ..DemoActions::default()
    })
  }

  #[tokio::test(start_paused = true)]
  async fn test_unauthorized_read_not_swallowed() {
    let demo = demo(failing_get(ApiError::Unauthorized {
      message: "token expired".to_string(),
    }));

    let err = demo
      .get(PathOptions::new("cars").with_id("1").with_throw_error(false))
      .await
      .unwrap_err();
    assert!(err.is_unauthorized());
  }

  #[tokio::test(start_paused = true)]
  async fn test_other_read_errors_swallowed_when_not_throwing() {
    let demo = demo(failing_get(ApiError::Http {
      code: 500,
      name: "Internal Server Error".to_string(),
      message: "database offline".to_string(),
    }));

    let quiet = demo
      .get(PathOptions::new("cars").with_id("1").with_throw_error(false))
      .await;
    assert_eq!(quiet, Ok(None));

    let loud = demo.get(PathOptions::new("cars").with_id("1")).await;
    assert!(matches!(loud, Err(ApiError::Http { code: 500, .. })));
  }

  #[test]
  fn test_parse_fixtures() {
    let yaml = r#"
groups:
  - nav: cars
    data:
      - { id: "1", model: suv }
  - nav: [people, users]
    path: v1/people
"#;
    let groups = parse_fixtures(yaml).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].data, vec![json!({"id": "1", "model": "suv"})]);
    assert_eq!(groups[1].nav, vec!["people".to_string(), "users".to_string()]);
  }
}
