//! Error taxonomy shared by the transports, stores and actions.

use serde::Serialize;

/// Result type for navdata operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by transports, stores and actions.
///
/// `Clone` so a single failed request can be handed to every caller that was
/// waiting on the same in-flight read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  /// HTTP 401. Always propagated, regardless of `throw_error`.
  #[error("Unauthorized: {message}")]
  Unauthorized { message: String },

  /// Any other non-2xx response.
  #[error("{message}")]
  Http {
    code: u16,
    name: String,
    message: String,
  },

  /// The request never produced a response.
  #[error("Network error: {0}")]
  Network(String),

  /// The response body could not be parsed.
  #[error("Failed to parse response: {0}")]
  Parse(String),

  /// No navigation item or demo group matched the request.
  #[error("Not found: {0}")]
  NotFound(String),

  /// Validation or guard failure raised on the client.
  #[error("{0}")]
  Local(String),

  /// Local persisted cache failure.
  #[error("Local cache error: {0}")]
  Storage(String),

  /// Anything else, mirroring a bare rejected promise.
  #[error("{0}")]
  Problem(String),
}

/// Serializable error shape handed to UI-facing callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorShape {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code: Option<u16>,
  pub name: String,
  pub message: String,
}

impl ApiError {
  /// Wrap an arbitrary failure message, falling back to "Problem".
  pub fn problem(message: impl Into<String>) -> Self {
    let message = message.into();
    if message.is_empty() {
      Self::Problem("Problem".to_string())
    } else {
      Self::Problem(message)
    }
  }

  pub fn code(&self) -> Option<u16> {
    match self {
      Self::Unauthorized { .. } => Some(401),
      Self::Http { code, .. } => Some(*code),
      _ => None,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Unauthorized { .. })
  }

  pub fn name(&self) -> &str {
    match self {
      Self::Unauthorized { .. } => "Unauthorized",
      Self::Http { name, .. } => name,
      Self::Network(_) => "NetworkError",
      Self::Parse(_) => "ParseError",
      Self::NotFound(_) => "NotFound",
      Self::Local(_) => "LocalError",
      Self::Storage(_) => "StorageError",
      Self::Problem(_) => "Error",
    }
  }

  pub fn shape(&self) -> ErrorShape {
    ErrorShape {
      code: self.code(),
      name: self.name().to_string(),
      message: self.to_string(),
    }
  }
}

impl From<rusqlite::Error> for ApiError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    Self::Parse(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unauthorized_shape() {
    let err = ApiError::Unauthorized {
      message: "token expired".to_string(),
    };
    let shape = err.shape();
    assert_eq!(shape.code, Some(401));
    assert_eq!(shape.name, "Unauthorized");
    assert!(err.is_unauthorized());
  }

  #[test]
  fn test_http_error_keeps_code_and_name() {
    let err = ApiError::Http {
      code: 404,
      name: "Not Found".to_string(),
      message: "Not Found: no such car".to_string(),
    };
    assert_eq!(err.code(), Some(404));
    assert_eq!(err.name(), "Not Found");
    assert_eq!(err.to_string(), "Not Found: no such car");
  }

  #[test]
  fn test_problem_defaults_message() {
    assert_eq!(ApiError::problem("").to_string(), "Problem");
    assert_eq!(ApiError::problem("boom").to_string(), "boom");
  }
}
