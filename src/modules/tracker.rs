//! Request tracker / loading coordinator
//!
//! Aggregates every outbound EMR or LLM call into two signals: whether any
//! call is outstanding, and the most recent error message. Calls are not
//! queued, ordered, deduplicated or retried; the tracker only observes them.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tracing::{debug, error};

/// Opaque, monotonically generated call identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "openmrs-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure(String),
    /// The caller dropped the call before it finished. Releases the id silently.
    Abandoned,
}

type LoadingObserver = Arc<dyn Fn(bool) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// A transition waiting to be delivered to observers
#[derive(Debug)]
enum Notice {
    Loading(bool),
    Error(Option<String>),
}

/// Transitions in the order they happened. One thread drains at a time, so
/// observers see them in that order without any tracker lock held.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notice>,
    draining: bool,
}

#[derive(Default)]
struct Observers {
    next_key: u64,
    loading: Vec<(u64, LoadingObserver)>,
    error: Vec<(u64, ErrorObserver)>,
}

pub struct RequestTracker {
    in_flight: Mutex<HashSet<RequestId>>,
    next_id: AtomicU64,
    loading: AtomicBool,
    outbox: Mutex<Outbox>,
    observers: RwLock<Observers>,
}

impl RequestTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            outbox: Mutex::new(Outbox::default()),
            observers: RwLock::new(Observers::default()),
        })
    }

    /// Record the start of a call.
    pub fn begin_call(&self) -> RequestId {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        {
            // Transitions are queued under the set lock so their order matches the count
            let mut in_flight = self.lock_in_flight();
            in_flight.insert(id);
            debug!(request_id = %id, in_flight = in_flight.len(), "Call started");

            if in_flight.len() == 1 {
                self.loading.store(true, Ordering::SeqCst);
                self.post(Notice::Loading(true));
            }
        }
        self.deliver();
        id
    }

    /// Record the end of a call. Returns false if `id` was not in flight,
    /// in which case nothing changes and nobody is notified.
    pub fn end_call(&self, id: RequestId, outcome: CallOutcome) -> bool {
        {
            let mut in_flight = self.lock_in_flight();
            if !in_flight.remove(&id) {
                debug!(request_id = %id, "Ignoring end of a call that is not in flight");
                return false;
            }
            debug!(request_id = %id, in_flight = in_flight.len(), outcome = ?outcome, "Call finished");

            if in_flight.is_empty() {
                self.loading.store(false, Ordering::SeqCst);
                self.post(Notice::Loading(false));
            }

            match outcome {
                CallOutcome::Success => self.post(Notice::Error(None)),
                CallOutcome::Failure(message) => self.post(Notice::Error(Some(message))),
                CallOutcome::Abandoned => {}
            }
        }
        self.deliver();
        true
    }

    /// Wrap a call so it is counted from start to finish.
    ///
    /// The id is released exactly once: on completion, on panic, or when the
    /// returned future is dropped early.
    pub async fn track<F, T, E>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut guard = CallGuard {
            tracker: self,
            id: Some(self.begin_call()),
        };

        let result = call.await;
        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) => CallOutcome::Failure(e.to_string()),
        };
        guard.finish(outcome);
        result
    }

    /// Register observers. They stay registered until the handle is dropped.
    ///
    /// Observers run with no tracker lock held and may call back into the
    /// tracker. Anything they trigger is delivered after the current notice.
    pub fn subscribe<L, E>(self: &Arc<Self>, on_loading: L, on_error: E) -> Subscription
    where
        L: Fn(bool) + Send + Sync + 'static,
        E: Fn(Option<&str>) + Send + Sync + 'static,
    {
        let mut observers = self.write_observers();
        let key = observers.next_key;
        observers.next_key += 1;
        observers.loading.push((key, Arc::new(on_loading)));
        observers.error.push((key, Arc::new(on_error)));
        Subscription {
            tracker: Arc::downgrade(self),
            key,
        }
    }

    /// Loading-only subscription
    pub fn subscribe_loading<L>(self: &Arc<Self>, on_loading: L) -> Subscription
    where
        L: Fn(bool) + Send + Sync + 'static,
    {
        let mut observers = self.write_observers();
        let key = observers.next_key;
        observers.next_key += 1;
        observers.loading.push((key, Arc::new(on_loading)));
        Subscription {
            tracker: Arc::downgrade(self),
            key,
        }
    }

    /// The user dismissed the error banner
    pub fn clear_error(&self) {
        {
            let _in_flight = self.lock_in_flight();
            self.post(Notice::Error(None));
        }
        self.deliver();
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn unsubscribe(&self, key: u64) {
        let mut observers = self.write_observers();
        observers.loading.retain(|(k, _)| *k != key);
        observers.error.retain(|(k, _)| *k != key);
    }

    fn post(&self, notice: Notice) {
        self.lock_outbox().queue.push_back(notice);
    }

    // Returns at once if another caller, or an observer further up this
    // stack, is already draining. That drainer picks up what was posted.
    fn deliver(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let notice = {
                let mut outbox = self.lock_outbox();
                match outbox.queue.pop_front() {
                    Some(notice) => notice,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            match notice {
                Notice::Loading(loading) => self.notify_loading(loading),
                Notice::Error(message) => self.notify_error(message.as_deref()),
            }
        }
    }

    fn notify_loading(&self, loading: bool) {
        let snapshot: Vec<LoadingObserver> = self
            .read_observers()
            .loading
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(loading))).is_err() {
                error!("Error in loading callback");
            }
        }
    }

    fn notify_error(&self, message: Option<&str>) {
        let snapshot: Vec<ErrorObserver> = self
            .read_observers()
            .error
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(message))).is_err() {
                error!("Error in error callback");
            }
        }
    }

    // The tracker never panics on a poisoned lock; the data is a plain set.
    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<RequestId>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_observers(&self) -> std::sync::RwLockReadGuard<'_, Observers> {
        self.observers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_observers(&self) -> std::sync::RwLockWriteGuard<'_, Observers> {
        self.observers.write().unwrap_or_else(|e| e.into_inner())
    }
}

struct CallGuard<'a> {
    tracker: &'a RequestTracker,
    id: Option<RequestId>,
}

impl CallGuard<'_> {
    fn finish(&mut self, outcome: CallOutcome) {
        if let Some(id) = self.id.take() {
            self.tracker.end_call(id, outcome);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.finish(CallOutcome::Abandoned);
    }
}

/// Deregisters its observers when dropped
#[must_use = "dropping the subscription deregisters its observers"]
pub struct Subscription {
    tracker: Weak<RequestTracker>,
    key: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unsubscribe(self.key);
        }
    }
}
