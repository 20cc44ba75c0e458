//! De-duplication of identical concurrent requests.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

type Pending<T> = HashMap<String, (u64, Shared<BoxFuture<'static, T>>)>;

/// Per-key memo of in-flight futures.
///
/// The first caller for a key starts the work; callers arriving while it is
/// still pending await the same shared future and get a clone of its output.
/// The entry is dropped as soon as the work settles, success or failure.
pub struct InFlight<T: Clone> {
  pending: Mutex<Pending<T>>,
  generation: AtomicU64,
}

impl<T: Clone> Default for InFlight<T> {
  fn default() -> Self {
    Self {
      pending: Mutex::new(HashMap::new()),
      generation: AtomicU64::new(0),
    }
  }
}

impl<T> InFlight<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `make()` for `key`, or join the run already in progress.
  pub async fn run<F, Fut>(&self, key: &str, make: F) -> T
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T> + Send + 'static,
  {
    let (generation, future) = {
      let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
      match pending.get(key) {
        Some((generation, future)) => {
          debug!(key, "joining in-flight request");
          (*generation, future.clone())
        }
        None => {
          let generation = self.generation.fetch_add(1, Ordering::Relaxed);
          let future = make().boxed().shared();
          pending.insert(key.to_string(), (generation, future.clone()));
          (generation, future)
        }
      }
    };

    let output = future.await;

    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    if pending.get(key).is_some_and(|(g, _)| *g == generation) {
      pending.remove(key);
    }
    output
  }

  pub fn is_pending(&self, key: &str) -> bool {
    self
      .pending
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_concurrent_runs_share_one_call() {
    let memo: InFlight<u32> = InFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let make = || {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        7
      }
    };

    let (a, b) = tokio::join!(memo.run("k", make()), memo.run("k", make()));
    assert_eq!((a, b), (7, 7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!memo.is_pending("k"));
  }

  #[tokio::test]
  async fn test_entry_removed_after_failure() {
    let memo: InFlight<Result<u32, String>> = InFlight::new();
    let result = memo.run("k", || async { Err("boom".to_string()) }).await;
    assert_eq!(result, Err("boom".to_string()));
    assert!(!memo.is_pending("k"));

    let result = memo.run("k", || async { Ok(1) }).await;
    assert_eq!(result, Ok(1));
  }

  #[tokio::test]
  async fn test_different_keys_run_separately() {
    let memo: InFlight<&'static str> = InFlight::new();
    let (a, b) = tokio::join!(
      memo.run("a", || async { "a" }),
      memo.run("b", || async { "b" })
    );
    assert_eq!((a, b), ("a", "b"));
  }
}
