//! Credentials attached to outgoing requests and to cache keys.

use chrono::{DateTime, Utc};
use std::sync::{PoisonError, RwLock};

/// A logged-in session obtained from an OAuth2 token flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub token: Option<String>,
  pub user_id: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
  /// Tenant the user is acting on behalf of
  pub proxy_id: Option<String>,
}

/// Current authentication state, shared by the transport and the stores.
#[derive(Debug, Default)]
pub struct Auth {
  credentials: RwLock<Credentials>,
  use_bearer_token: bool,
}

impl Auth {
  pub fn new(use_bearer_token: bool) -> Self {
    Self {
      credentials: RwLock::new(Credentials::default()),
      use_bearer_token,
    }
  }

  pub fn with_credentials(self, credentials: Credentials) -> Self {
    *self.credentials.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    self
  }

  pub fn login(&self, credentials: Credentials) {
    tracing::debug!(user = ?credentials.user_id, "logged in");
    *self.credentials.write().unwrap_or_else(PoisonError::into_inner) = credentials;
  }

  pub fn logout(&self) {
    let mut creds = self.credentials.write().unwrap_or_else(PoisonError::into_inner);
    tracing::debug!(user = ?creds.user_id, "logged out");
    *creds = Credentials::default();
  }

  pub fn use_bearer_token(&self) -> bool {
    self.use_bearer_token
  }

  /// True when a token is present and not past its expiry.
  pub fn is_logged_in(&self) -> bool {
    let creds = self.credentials.read().unwrap_or_else(PoisonError::into_inner);
    match (&creds.token, creds.expires_at) {
      (None, _) => false,
      (Some(_), Some(expires_at)) => Utc::now() < expires_at,
      (Some(_), None) => true,
    }
  }

  /// Token to send as a bearer credential, if bearer mode is on and logged in.
  pub fn bearer_token(&self) -> Option<String> {
    if !self.use_bearer_token || !self.is_logged_in() {
      return None;
    }
    self
      .credentials
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .token
      .clone()
  }

  /// User id for cache-key namespacing.
  pub fn user_id(&self) -> String {
    self
      .credentials
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .user_id
      .clone()
      .unwrap_or_else(|| "anonymous".to_string())
  }

  pub fn proxy_id(&self) -> Option<String> {
    self
      .credentials
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .proxy_id
      .clone()
  }
}
