//! Correlation of native completions with pending operations.
//!
//! A native call carries nothing but an operation id across the boundary.
//! When its callback fires, on whichever engine thread, the id is looked up
//! here and the matching completion is resolved.
//!
//! Terminal transitions (value, error, abort) remove the entry first and act
//! second, so each id reaches at most one outcome and any later attempt finds
//! nothing and does nothing.

use std::any::Any;
use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::task::{Context, Poll};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Identifier of one pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(NonZeroU64);

impl OperationId {
    /// Raw value passed to native code as callback user data.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Type-erased result sink of a pending operation.
trait PendingSink: Send {
    fn fail(self: Box<Self>, error: Error);
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Send + 'static> PendingSink for oneshot::Sender<Result<T>> {
    fn fail(self: Box<Self>, error: Error) {
        // a dropped receiver just means nobody is waiting any more
        let _ = (*self).send(Err(error));
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Table of pending operations.
pub struct OperationRegistry {
    pending: Mutex<FxHashMap<u64, Box<dyn PendingSink>>>,
    next_id: AtomicU64,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide registry used by every callback entry point.
    pub fn global() -> &'static OperationRegistry {
        static GLOBAL: OnceLock<OperationRegistry> = OnceLock::new();
        GLOBAL.get_or_init(OperationRegistry::new)
    }

    /// Register a pending operation producing `T`.
    ///
    /// The id is unique among pending operations; ids still in use after a
    /// counter wrap are skipped.
    pub fn create<T: Send + 'static>(&self) -> (OperationId, Completion<T>) {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let mut pending = self.pending.lock();
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            let Some(id) = NonZeroU64::new(candidate) else {
                continue;
            };
            if !pending.contains_key(&id.get()) {
                break id;
            }
        };
        pending.insert(id.get(), Box::new(tx));
        (OperationId(id), Completion { rx })
    }

    /// Drop a pending operation without resolving it.
    ///
    /// Used when the native call was refused synchronously. A waiting
    /// completion observes [`Error::Abandoned`].
    pub fn abort(&self, id: OperationId) {
        if self.pending.lock().remove(&id.get()).is_some() {
            tracing::debug!(operation = id.get(), "operation aborted");
        }
    }

    /// Resolve a pending operation with a value.
    ///
    /// Returns `false` if the id is not pending; the value is then dropped,
    /// which releases any native resources it owns.
    ///
    /// # Panics
    ///
    /// Panics if the operation was created for a different result type.
    pub fn complete_value<T: Send + 'static>(&self, id: u64, value: T) -> bool {
        let Some(sink) = self.take(id) else {
            return false;
        };
        match sink.into_any().downcast::<oneshot::Sender<Result<T>>>() {
            Ok(tx) => {
                let _ = tx.send(Ok(value));
                true
            }
            Err(_) => panic!(
                "operation {id} completed with unexpected result type {}",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Resolve a pending operation with an error.
    ///
    /// Returns `false` if the id is not pending.
    pub fn complete_error(&self, id: u64, error: Error) -> bool {
        match self.take(id) {
            Some(sink) => {
                sink.fail(error);
                true
            }
            None => false,
        }
    }

    /// Number of pending operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn take(&self, id: u64) -> Option<Box<dyn PendingSink>> {
        let sink = self.pending.lock().remove(&id);
        if sink.is_none() {
            tracing::warn!(operation = id, "completion for unknown operation ignored");
        }
        sink
    }
}

/// Future resolving to the outcome of one operation.
///
/// Dropping it does not cancel the native work; the eventual callback still
/// clears the registry entry and releases whatever it delivered.
#[derive(Debug)]
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashSet;
    use std::sync::Barrier;

    fn native_error(message: &str) -> Error {
        Error::Native {
            kind: ErrorKind::SqlError,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_complete_value_resolves() {
        let registry = OperationRegistry::new();
        let (id, completion) = registry.create::<u64>();
        assert_eq!(registry.pending(), 1);

        assert!(registry.complete_value(id.get(), 42_u64));
        assert_eq!(completion.await.unwrap(), 42);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_completion_is_noop() {
        let registry = OperationRegistry::new();
        let (id, completion) = registry.create::<String>();

        assert!(registry.complete_error(id.get(), native_error("first")));
        assert!(!registry.complete_value(id.get(), "second".to_string()));
        assert!(!registry.complete_error(id.get(), native_error("third")));

        let err = completion.await.unwrap_err();
        assert_eq!(err.message(), "first");
    }

    #[tokio::test]
    async fn test_abort_then_complete() {
        let registry = OperationRegistry::new();
        let (id, completion) = registry.create::<()>();

        registry.abort(id);
        assert!(!registry.complete_value(id.get(), ()));
        assert!(matches!(completion.await, Err(Error::Abandoned)));
    }

    #[test]
    fn test_completion_after_receiver_dropped() {
        let registry = OperationRegistry::new();
        let (id, completion) = registry.create::<Vec<u8>>();
        drop(completion);

        assert!(registry.complete_value::<Vec<u8>>(id.get(), vec![1, 2, 3]));
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    #[should_panic(expected = "unexpected result type")]
    fn test_type_mismatch_fails_fast() {
        let registry = OperationRegistry::new();
        let (id, _completion) = registry.create::<u64>();
        registry.complete_value(id.get(), "wrong".to_string());
    }

    #[test]
    fn test_ids_skip_zero_and_pending() {
        let registry = OperationRegistry::new();
        registry.next_id.store(u64::MAX, Ordering::Relaxed);
        let (first, _a) = registry.create::<()>();
        assert_eq!(first.get(), u64::MAX);

        // wraps through zero to 1
        let (second, _b) = registry.create::<()>();
        assert_eq!(second.get(), 1);

        let (third, _c) = registry.create::<()>();
        assert_eq!(third.get(), 2);

        // 2 is still pending, so it is skipped
        registry.next_id.store(2, Ordering::Relaxed);
        let (fourth, _d) = registry.create::<()>();
        assert_eq!(fourth.get(), 3);
    }

    #[test]
    fn test_concurrent_create_yields_distinct_ids() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;
        let registry = OperationRegistry::new();
        let barrier = Barrier::new(THREADS);

        let ids: Vec<Vec<u64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        (0..PER_THREAD)
                            .map(|_| {
                                let (id, _completion) = registry.create::<u64>();
                                id.get()
                            })
                            .collect()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<u64> = ids.iter().flatten().copied().collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert_eq!(registry.pending(), THREADS * PER_THREAD);
    }

    #[test]
    fn test_complete_abort_race_has_one_outcome() {
        let registry = OperationRegistry::new();
        for round in 0..200_u64 {
            let (id, completion) = registry.create::<u64>();
            let barrier = Barrier::new(2);
            let (completed, ()) = std::thread::scope(|s| {
                let completer = s.spawn(|| {
                    barrier.wait();
                    registry.complete_value(id.get(), round)
                });
                let aborter = s.spawn(|| {
                    barrier.wait();
                    registry.abort(id);
                });
                (completer.join().unwrap(), aborter.join().unwrap())
            });

            let outcome = futures::executor::block_on(completion);
            if completed {
                assert_eq!(outcome.unwrap(), round);
            } else {
                assert!(matches!(outcome, Err(Error::Abandoned)));
            }
            assert_eq!(registry.pending(), 0);
        }
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = OperationRegistry::global() as *const OperationRegistry;
        let b = OperationRegistry::global() as *const OperationRegistry;
        assert_eq!(a, b);
    }
}
