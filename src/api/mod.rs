//! Request transports: the HTTP client, the demo mock, and the router between them.

pub mod demo;
pub mod http;
pub mod path;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

pub use demo::{parse_fixtures, DemoAction, DemoActions, DemoApiGroup, DemoTransport};
pub use http::HttpTransport;
pub use path::{PathOptions, QueryParams};

/// The verbs every transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
  Get,
  GetAll,
  Post,
  Patch,
  Delete,
}

impl Verb {
  pub fn is_read(self) -> bool {
    matches!(self, Verb::Get | Verb::GetAll)
  }

  pub fn method(self) -> reqwest::Method {
    match self {
      Verb::Get | Verb::GetAll => reqwest::Method::GET,
      Verb::Post => reqwest::Method::POST,
      Verb::Patch => reqwest::Method::PATCH,
      Verb::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A backend that can answer CRUD requests described by [`PathOptions`].
///
/// Responses are raw JSON bodies. `Ok(None)` means "no body", or a read that
/// failed while `throw_error` was off.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn get(&self, opts: PathOptions) -> Result<Option<Value>>;

  async fn get_all(&self, opts: PathOptions) -> Result<Option<Value>>;

  async fn post(&self, opts: PathOptions) -> Result<Option<Value>>;

  async fn patch(&self, opts: PathOptions) -> Result<Option<Value>>;

  async fn delete(&self, opts: PathOptions) -> Result<Option<Value>>;

  /// Upload raw image bytes. `file_name` drives the content type.
  async fn upload_image(
    &self,
    opts: PathOptions,
    file_name: &str,
    bytes: Vec<u8>,
  ) -> Result<Option<Value>>;
}

/// The transport handed to stores and actions.
///
/// Sends everything to the demo transport while demo mode is on, and to the
/// network otherwise.
pub struct Api {
  http: HttpTransport,
  demo: Option<Arc<DemoTransport>>,
}

impl Api {
  pub fn new(http: HttpTransport, demo: Option<Arc<DemoTransport>>) -> Self {
    Self { http, demo }
  }

  pub fn demo(&self) -> Option<&Arc<DemoTransport>> {
    self.demo.as_ref()
  }

  fn demoing(&self) -> Option<&DemoTransport> {
    self.demo.as_deref().filter(|d| d.is_demoing())
  }
}

#[async_trait]
impl Transport for Api {
  async fn get(&self, opts: PathOptions) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.get(opts).await,
      None => self.http.get(opts).await,
    }
  }

  async fn get_all(&self, opts: PathOptions) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.get_all(opts).await,
      None => self.http.get_all(opts).await,
    }
  }

  async fn post(&self, opts: PathOptions) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.post(opts).await,
      None => self.http.post(opts).await,
    }
  }

  async fn patch(&self, opts: PathOptions) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.patch(opts).await,
      None => self.http.patch(opts).await,
    }
  }

  async fn delete(&self, opts: PathOptions) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.delete(opts).await,
      None => self.http.delete(opts).await,
    }
  }

  async fn upload_image(
    &self,
    opts: PathOptions,
    file_name: &str,
    bytes: Vec<u8>,
  ) -> Result<Option<Value>> {
    match self.demoing() {
      Some(demo) => demo.upload_image(opts, file_name, bytes).await,
      None => self.http.upload_image(opts, file_name, bytes).await,
    }
  }
}

#[cfg(test)]
pub(crate) mod mock {
  //! Counting transport used by store and action tests.

  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  type Responder = Box<dyn Fn(Verb, &PathOptions) -> Result<Option<Value>> + Send + Sync>;

  pub struct MockTransport {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<(Verb, PathOptions)>>,
  }

  impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
      F: Fn(Verb, &PathOptions) -> Result<Option<Value>> + Send + Sync + 'static,
    {
      Self {
        responder: Box::new(responder),
        delay: Duration::ZERO,
        calls: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
      }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(Verb, PathOptions)> {
      self.requests.lock().unwrap().last().cloned()
    }

    async fn respond(&self, verb: Verb, opts: PathOptions) -> Result<Option<Value>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      let result = (self.responder)(verb, &opts);
      self.requests.lock().unwrap().push((verb, opts));
      result
    }
  }

  #[async_trait]
  impl Transport for MockTransport {
    async fn get(&self, opts: PathOptions) -> Result<Option<Value>> {
      self.respond(Verb::Get, opts).await
    }

    async fn get_all(&self, opts: PathOptions) -> Result<Option<Value>> {
      self.respond(Verb::GetAll, opts).await
    }

    async fn post(&self, opts: PathOptions) -> Result<Option<Value>> {
      self.respond(Verb::Post, opts).await
    }

    async fn patch(&self, opts: PathOptions) -> Result<Option<Value>> {
      self.respond(Verb::Patch, opts).await
    }

    async fn delete(&self, opts: PathOptions) -> Result<Option<Value>> {
      self.respond(Verb::Delete, opts).await
    }

    async fn upload_image(
      &self,
      opts: PathOptions,
      _file_name: &str,
      _bytes: Vec<u8>,
    ) -> Result<Option<Value>> {
      self.respond(Verb::Post, opts).await
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::Auth;
  use crate::nav::{Navigation, NavigationItem};
  use serde_json::json;
  use std::time::Duration;

  fn api() -> Api {
    let navigation = Arc::new(Navigation::new(
      "http://127.0.0.1:9",
      vec![NavigationItem::new("cars")],
    ));
    let http = HttpTransport::new(navigation.clone(), Arc::new(Auth::new(true)), "X-Proxy-Id")
      .expect("http transport");
    let demo = DemoTransport::new(navigation)
      .with_delay(Duration::ZERO)
      .with_group(DemoApiGroup::new("cars", vec![json!({"id": "1", "model": "suv"})]));
    demo.set_demoing(true);
    Api::new(http, Some(Arc::new(demo)))
  }

  #[tokio::test]
  async fn test_api_routes_to_demo_when_demoing() {
    let api = api();
    let result = api.get(PathOptions::new("cars").with_id("1")).await.unwrap();
    assert_eq!(result, Some(json!({"data": {"id": "1", "model": "suv"}})));
  }

  #[tokio::test]
  async fn test_api_routes_to_network_when_not_demoing() {
    let api = api();
    api.demo().unwrap().set_demoing(false);
    // Nothing listens on the discard port, so the network path fails.
    let result = api.get(PathOptions::new("cars").with_id("1")).await;
    assert!(matches!(result, Err(crate::error::ApiError::Network(_))));
  }
}
