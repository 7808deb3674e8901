//! Suppresses duplicate concurrent invocations for the same key.
//!
//! When many callers miss the cache for the same key at the same time, only one of them should
//! actually hit the backing source. The first caller to register becomes the **leader** and
//! runs the work, all overlapping callers become **waiters** and simply receive the leader's
//! result. Once the leader completes, its registration is deleted *before* the result is
//! broadcast - callers arriving after that point start a fresh invocation.
//!
//! Note that this is **not** a cache: back-to-back sequential calls run the work every time.
//! Suppressing those is what the actual caches are for, the two mechanisms compose but must
//! not be conflated.
//!
//! # Examples
//!
//! ```no_run
//! # use callisto::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight: SingleFlight<String> = SingleFlight::new();
//!
//! // All concurrent calls for "answer" share one execution of the async block...
//! let value = flight
//!     .execute("answer", || async { Ok("42".to_owned()) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, "42");
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Represents an error shared between the leader and all waiters of a flight.
///
/// As **anyhow::Error** cannot be cloned, the single error instance is reference counted and
/// every caller of the flight receives the same one.
pub type SharedError = Arc<anyhow::Error>;

/// Collapses concurrent calls for the same key into a single execution.
///
/// The registry only contains **in-flight** calls - entries are created when a leader
/// registers and deleted the moment its work completes. The mutex therefore only guards
/// short insert/lookup/delete sections, never the work itself.
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, broadcast::Sender<Result<T, SharedError>>>>,
}

/// Tracks the leader's registration so that it is cleaned up even if the leader's future is
/// dropped mid-flight - waiters then observe an abandoned call instead of hanging forever.
struct Flight<'a, T: Clone> {
    group: &'a SingleFlight<T>,
    key: &'a str,
    completed: bool,
}

impl<'a, T: Clone> Flight<'a, T> {
    fn complete(mut self, result: &Result<T, SharedError>) {
        self.completed = true;

        let sender = self.group.calls.lock().unwrap().remove(self.key);
        if let Some(sender) = sender {
            // Waiters may have given up in the meantime, in which case nobody listens...
            let _ = sender.send(result.clone());
        }
    }
}

impl<'a, T: Clone> Drop for Flight<'a, T> {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.group.calls.lock().unwrap().remove(self.key);
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Creates a new, empty flight group.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given work, unless a call for the same key is already in flight - in which
    /// case the caller blocks until that call completes and receives its result.
    ///
    /// The work runs **at most once** per key across all callers whose invocations overlap in
    /// time. A caller arriving after a completed call triggers a fresh execution.
    pub async fn execute<F, Fut>(&self, key: &str, work: F) -> Result<T, SharedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let waiter = {
            let mut calls = self.calls.lock().unwrap();
            match calls.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    let _ = calls.insert(key.to_owned(), sender);
                    None
                }
            }
        };

        if let Some(mut waiter) = waiter {
            return match waiter.recv().await {
                Ok(result) => result,
                Err(_) => Err(Arc::new(anyhow::anyhow!(
                    "The in-flight call for '{}' was abandoned before completing.",
                    key
                ))),
            };
        }

        let flight = Flight {
            group: self,
            key,
            completed: false,
        };

        let result = work().await.map_err(Arc::new);
        flight.complete(&result);

        result
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::Duration;

    use super::SingleFlight;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_calls_share_one_execution() {
        let flight: Arc<SingleFlight<i32>> = Arc::new(SingleFlight::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let flight = flight.clone();
            let invocations = invocations.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .execute("x", move || async move {
                        let _ = invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // A call after completion is a fresh flight...
        let observed = invocations.clone();
        let result = flight
            .execute("x", move || async move {
                let _ = observed.fetch_add(1, Ordering::SeqCst);
                Ok(43)
            })
            .await;
        assert_eq!(result.unwrap(), 43);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let flight: SingleFlight<&'static str> = SingleFlight::new();

        let first = flight.execute("a", || async { Ok("one") }).await;
        let second = flight.execute("b", || async { Ok("two") }).await;

        assert_eq!(first.unwrap(), "one");
        assert_eq!(second.unwrap(), "two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_observe_the_leaders_error() {
        let flight: Arc<SingleFlight<i32>> = Arc::new(SingleFlight::new());

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let flight = flight.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .execute("broken", move || async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(anyhow::anyhow!("the backing store is gone"))
                    })
                    .await
            }));
        }

        for task in tasks {
            let error = task.await.unwrap().unwrap_err();
            assert!(error.to_string().contains("the backing store is gone"));
        }
    }
}
