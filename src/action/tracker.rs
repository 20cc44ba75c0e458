//! Loading, error and completion messages shared by every action.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};

/// Receives a failed action's error instead of it being thrown or recorded.
pub type ErrorHook = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// How a single [`ActionTracker::do_action`] call reports itself.
#[derive(Clone, Default)]
pub struct DoActionSettings {
  pub loading_msg: Option<String>,
  pub complete_msg: Option<String>,
  pub throw_error: bool,
  pub on_error: Option<ErrorHook>,
}

#[derive(Debug, Default)]
struct Messages {
  loading: Vec<(u64, String)>,
  error: Option<String>,
  completion: Option<String>,
}

/// Shared message state for concurrently running actions.
///
/// Every running action with a loading message holds one entry in the loading
/// list; the displayed message is the oldest entry still pending.
#[derive(Debug, Default)]
pub struct ActionTracker {
  messages: Mutex<Messages>,
  next_id: AtomicU64,
}

/// Removes its loading entry when dropped, whatever way the action ended.
struct LoadingEntry<'a> {
  tracker: &'a ActionTracker,
  id: u64,
}

impl Drop for LoadingEntry<'_> {
  fn drop(&mut self) {
    self
      .tracker
      .messages()
      .loading
      .retain(|(id, _)| *id != self.id);
  }
}

impl ActionTracker {
  pub fn new() -> Self {
    Self::default()
  }

  fn messages(&self) -> MutexGuard<'_, Messages> {
    self.messages.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn current_loading_message(&self) -> Option<String> {
    self.messages().loading.first().map(|(_, msg)| msg.clone())
  }

  pub fn is_loading(&self) -> bool {
    !self.messages().loading.is_empty()
  }

  pub fn error_message(&self) -> Option<String> {
    self.messages().error.clone()
  }

  pub fn completion_message(&self) -> Option<String> {
    self.messages().completion.clone()
  }

  pub fn set_error(&self, message: impl Into<String>) {
    self.messages().error = Some(message.into());
  }

  pub fn clear_messages(&self) {
    let mut messages = self.messages();
    messages.error = None;
    messages.completion = None;
  }

  fn start_loading(&self, message: String) -> LoadingEntry<'_> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.messages().loading.push((id, message));
    LoadingEntry { tracker: self, id }
  }

  /// Run `action`, keeping the shared messages up to date.
  ///
  /// Errors are handed to `on_error` if set, re-thrown if `throw_error`,
  /// or else recorded as the current error and turned into `Ok(None)`.
  /// Unauthorized errors are always re-thrown.
  pub async fn do_action<T, Fut>(&self, settings: &DoActionSettings, action: Fut) -> Result<Option<T>>
  where
    Fut: Future<Output = Result<Option<T>>>,
  {
    self.messages().error = None;
    let _loading = settings
      .loading_msg
      .clone()
      .map(|message| self.start_loading(message));

    match action.await {
      Ok(result) => {
        if let Some(message) = &settings.complete_msg {
          self.messages().completion = Some(message.clone());
        }
        Ok(result)
      }
      Err(e) if e.is_unauthorized() => {
        warn!(error = %e, "action unauthorized");
        Err(e)
      }
      Err(e) => {
        if let Some(on_error) = &settings.on_error {
          debug!(error = %e, "action error handled by hook");
          on_error(&e);
          Ok(None)
        } else if settings.throw_error {
          Err(e)
        } else {
          warn!(error = %e, "action failed");
          self.messages().error = Some(e.to_string());
          Ok(None)
        }
      }
    }
  }
}
