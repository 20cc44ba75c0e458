//! Network transport built on reqwest.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{PathOptions, Transport, Verb};
use crate::auth::Auth;
use crate::error::{ApiError, Result};
use crate::nav::Navigation;

/// Sends requests to the real API.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  navigation: Arc<Navigation>,
  auth: Arc<Auth>,
  tenant_header: String,
}

impl HttpTransport {
  pub fn new(
    navigation: Arc<Navigation>,
    auth: Arc<Auth>,
    tenant_header: impl Into<String>,
  ) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("navdata/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      navigation,
      auth,
      tenant_header: tenant_header.into(),
    })
  }

  /// Headers for a request: explicit overrides, then tenant, auth and content type.
  pub fn build_headers(&self, opts: &PathOptions) -> BTreeMap<String, String> {
    let mut headers = opts.headers.clone();

    if let Some(proxy_id) = opts.proxy_id.clone().or_else(|| self.auth.proxy_id()) {
      if !has_header(&headers, &self.tenant_header) {
        headers.insert(self.tenant_header.clone(), proxy_id);
      }
    }

    if let Some(token) = self.auth.bearer_token() {
      if !has_header(&headers, "Authorization") {
        headers.insert("Authorization".to_string(), format!("bearer {}", token));
      }
    }

    if !has_header(&headers, "Content-Type") {
      headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    headers
  }

  async fn request(&self, verb: Verb, opts: PathOptions) -> Result<Option<Value>> {
    let body = match &opts.data {
      Some(data) if !verb.is_read() => Some(serde_json::to_vec(data)?),
      _ => None,
    };
    let throw_error = opts.throw_error;

    match self.send(verb, opts, body).await {
      Err(e) if verb.is_read() && !throw_error && !e.is_unauthorized() => {
        warn!(error = %e, "request failed, returning nothing");
        Ok(None)
      }
      other => other,
    }
  }

  async fn send(
    &self,
    verb: Verb,
    mut opts: PathOptions,
    body: Option<Vec<u8>>,
  ) -> Result<Option<Value>> {
    let url = opts.build_url(&self.navigation);
    debug!(?verb, %url, "sending request");

    let mut request = self.client.request(verb.method(), &url);
    for (name, value) in self.build_headers(&opts) {
      request = request.header(name, value);
    }
    if let Some(body) = body {
      request = request.body(body);
    }

    let response = request.send().await.map_err(|e| {
      warn!(%url, error = %e, "request failed");
      ApiError::Network(e.to_string())
    })?;

    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    if !status.is_success() {
      warn!(%url, status = status.as_u16(), "request returned an error status");
      return Err(error_from_status(status, &text));
    }

    parse_body(&opts, &text)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn get(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.request(Verb::Get, opts).await
  }

  async fn get_all(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.request(Verb::GetAll, opts).await
  }

  async fn post(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.request(Verb::Post, opts).await
  }

  async fn patch(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.request(Verb::Patch, opts).await
  }

  async fn delete(&self, opts: PathOptions) -> Result<Option<Value>> {
    self.request(Verb::Delete, opts).await
  }

  async fn upload_image(
    &self,
    opts: PathOptions,
    file_name: &str,
    bytes: Vec<u8>,
  ) -> Result<Option<Value>> {
    let opts = opts
      .with_header("Content-Type", image_content_type(file_name))
      .with_header("X-File-Name", file_name);
    self.send(Verb::Post, opts, Some(bytes)).await
  }
}

fn has_header(headers: &BTreeMap<String, String>, name: &str) -> bool {
  headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Normalize a non-2xx response into an [`ApiError`].
pub fn error_from_status(status: StatusCode, body: &str) -> ApiError {
  let reason = status.canonical_reason().unwrap_or("Error");
  let body = body.trim();

  if status == StatusCode::UNAUTHORIZED {
    return ApiError::Unauthorized {
      message: if body.is_empty() {
        reason.to_string()
      } else {
        body.to_string()
      },
    };
  }

  let message = if body.is_empty() {
    reason.to_string()
  } else {
    format!("{}: {}", reason, body)
  };

  ApiError::Http {
    code: status.as_u16(),
    name: reason.to_string(),
    message,
  }
}

/// Parse a response body according to the request's `return_text` / `return_json` flags.
pub fn parse_body(opts: &PathOptions, text: &str) -> Result<Option<Value>> {
  if text.trim().is_empty() {
    return Ok(None);
  }
  if opts.return_text {
    return Ok(Some(Value::String(text.to_string())));
  }
  serde_json::from_str(text)
    .map(Some)
    .map_err(|e| ApiError::Parse(e.to_string()))
}

fn image_content_type(file_name: &str) -> &'static str {
  let ext = file_name
    .rsplit_once('.')
    .map(|(_, ext)| ext.to_ascii_lowercase())
    .unwrap_or_default();
  match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "svg" => "image/svg+xml",
    _ => "application/octet-stream",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::Credentials;
  use serde_json::json;

  fn transport(auth: Auth) -> HttpTransport {
    HttpTransport::new(
      Arc::new(Navigation::new("https://api.example.com", Vec::new())),
      Arc::new(auth),
      "X-Proxy-Id",
    )
    .expect("client")
  }

  fn logged_in() -> Auth {
    Auth::new(true).with_credentials(Credentials {
      token: Some("tok".to_string()),
      user_id: Some("u1".to_string()),
      expires_at: None,
      proxy_id: Some("tenant-a".to_string()),
    })
  }

  #[test]
  fn test_build_headers_defaults() {
    let headers = transport(logged_in()).build_headers(&PathOptions::new("cars"));
    assert_eq!(headers.get("Authorization").map(String::as_str), Some("bearer tok"));
    assert_eq!(headers.get("X-Proxy-Id").map(String::as_str), Some("tenant-a"));
    assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/json"));
  }

  #[test]
  fn test_build_headers_overrides_win() {
    let opts = PathOptions::new("cars")
      .with_header("content-type", "text/csv")
      .with_proxy_id("tenant-b");
    let headers = transport(logged_in()).build_headers(&opts);
    assert_eq!(headers.get("content-type").map(String::as_str), Some("text/csv"));
    assert!(!headers.contains_key("Content-Type"));
    assert_eq!(headers.get("X-Proxy-Id").map(String::as_str), Some("tenant-b"));
  }

  #[test]
  fn test_build_headers_logged_out_has_no_auth() {
    let headers = transport(Auth::new(true)).build_headers(&PathOptions::new("cars"));
    assert!(!headers.contains_key("Authorization"));
    assert!(!headers.contains_key("X-Proxy-Id"));
  }

  #[test]
  fn test_error_from_status() {
    let err = error_from_status(StatusCode::UNAUTHORIZED, "");
    assert!(err.is_unauthorized());

    let err = error_from_status(StatusCode::BAD_REQUEST, "model is required");
    assert_eq!(
      err,
      ApiError::Http {
        code: 400,
        name: "Bad Request".to_string(),
        message: "Bad Request: model is required".to_string(),
      }
    );
  }

  #[test]
  fn test_parse_body_flags() {
    let opts = PathOptions::new("cars");
    assert_eq!(parse_body(&opts, "{\"id\": 1}").unwrap(), Some(json!({"id": 1})));
    assert_eq!(parse_body(&opts, "  ").unwrap(), None);
    assert!(matches!(parse_body(&opts, "not json"), Err(ApiError::Parse(_))));

    let opts = opts.with_return_text();
    assert_eq!(parse_body(&opts, "not json").unwrap(), Some(json!("not json")));
  }

  #[test]
  fn test_image_content_type() {
    assert_eq!(image_content_type("logo.PNG"), "image/png");
    assert_eq!(image_content_type("photo.jpeg"), "image/jpeg");
    assert_eq!(image_content_type("blob"), "application/octet-stream");
  }

  #[tokio::test]
  async fn test_read_failures_swallowed_when_not_throwing() {
    let t = HttpTransport::new(
      Arc::new(Navigation::new("http://127.0.0.1:9", Vec::new())),
      Arc::new(Auth::new(true)),
      "X-Proxy-Id",
    )
    .expect("client");

    let result = t.get(PathOptions::new("cars").with_throw_error(false)).await;
    assert_eq!(result, Ok(None));

    let result = t.post(PathOptions::new("cars").with_throw_error(false)).await;
    assert!(matches!(result, Err(ApiError::Network(_))));
  }
}
