//! Testing utilities
//!
//! Scripted in-memory implementations of the todo services and a tracker for
//! measuring how many operations run at once. Used by unit tests, the
//! integration tests under `tests/` and the benchmarks.

use crate::effect::Effect;
use crate::todos::{FetchError, Todo, TodoService, User, UserId, UserService};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks the number of operations in flight and the highest number seen.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    max: AtomicUsize,
}

struct TrackerGuard<'a>(&'a ConcurrencyTracker);

impl Drop for TrackerGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `future` as in flight until it completes or is dropped.
    pub async fn track<F: Future>(&self, future: F) -> F::Output {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        let _guard = TrackerGuard(self);
        future.await
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ScriptState {
    todos: Vec<Todo>,
    todo_failures: Mutex<VecDeque<FetchError>>,
    users: HashMap<UserId, User>,
    user_failures: Mutex<HashMap<UserId, VecDeque<FetchError>>>,
    latency: Duration,
    todo_calls: AtomicUsize,
    user_calls: Mutex<HashMap<UserId, usize>>,
    tracker: ConcurrencyTracker,
}

/// In-memory todo and user services with scripted failures.
///
/// Scripted failures for a resource are consumed one per call, in order;
/// once exhausted, calls succeed (or report `UserNotFound` for unknown ids).
#[derive(Clone, Default)]
pub struct ScriptedTodoApi {
    state: Arc<ScriptState>,
}

impl ScriptedTodoApi {
    pub fn builder() -> ScriptedTodoApiBuilder {
        ScriptedTodoApiBuilder::default()
    }

    pub fn todo_calls(&self) -> usize {
        self.state.todo_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self, id: UserId) -> usize {
        lock(&self.state.user_calls).get(&id).copied().unwrap_or(0)
    }

    pub fn total_user_calls(&self) -> usize {
        lock(&self.state.user_calls).values().sum()
    }

    /// Highest number of user lookups that were in flight at once.
    pub fn max_concurrent_user_calls(&self) -> usize {
        self.state.tracker.max_observed()
    }

    pub fn user_calls_in_flight(&self) -> usize {
        self.state.tracker.current()
    }
}

impl ScriptState {
    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn fetch_todos(&self) -> Result<Vec<Todo>, FetchError> {
        self.todo_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.todo_failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(self.todos.clone()),
        }
    }

    fn fetch_user(&self, id: UserId) -> Result<User, FetchError> {
        *lock(&self.user_calls).entry(id).or_default() += 1;
        let scripted = lock(&self.user_failures)
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }
        self.users
            .get(&id)
            .cloned()
            .ok_or(FetchError::UserNotFound { user_id: id })
    }
}

impl TodoService for ScriptedTodoApi {
    fn todos(&self) -> Effect<Vec<Todo>, FetchError> {
        let state = self.state.clone();
        Effect::from_future(move || {
            let state = state.clone();
            async move {
                state.pause().await;
                state.fetch_todos()
            }
        })
    }
}

impl UserService for ScriptedTodoApi {
    fn user(&self, id: UserId) -> Effect<User, FetchError> {
        let state = self.state.clone();
        Effect::from_future(move || {
            let state = state.clone();
            async move {
                state.tracker.track(state.pause()).await;
                state.fetch_user(id)
            }
        })
    }
}

/// Builder for [`ScriptedTodoApi`]
#[derive(Default)]
pub struct ScriptedTodoApiBuilder {
    state: ScriptState,
}

impl ScriptedTodoApiBuilder {
    /// Add a todo owned by `user_id`.
    pub fn todo(mut self, id: u64, user_id: UserId, title: impl Into<String>) -> Self {
        self.state.todos.push(Todo {
            id,
            user_id,
            title: title.into(),
            completed: false,
        });
        self
    }

    pub fn user(mut self, id: UserId, username: impl Into<String>) -> Self {
        self.state.users.insert(
            id,
            User {
                id,
                username: username.into(),
            },
        );
        self
    }

    /// Queue failures returned by the next lookups of `id`.
    pub fn fail_user(mut self, id: UserId, failures: impl IntoIterator<Item = FetchError>) -> Self {
        self.state
            .user_failures
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .extend(failures);
        self
    }

    /// Queue failures returned by the next fetches of the todo list.
    pub fn fail_todos(mut self, failures: impl IntoIterator<Item = FetchError>) -> Self {
        self.state
            .todo_failures
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(failures);
        self
    }

    /// Simulated latency of every call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.state.latency = latency;
        self
    }

    pub fn build(self) -> ScriptedTodoApi {
        ScriptedTodoApi {
            state: Arc::new(self.state),
        }
    }
}

/// A transport failure as produced by the HTTP client.
pub fn transport_error(path: &str) -> FetchError {
    FetchError::Transport {
        url: format!("http://scripted/{path}"),
        message: "connection reset".to_string(),
    }
}

/// A body that could not be decoded.
pub fn decode_error(path: &str) -> FetchError {
    FetchError::Decode {
        url: format!("http://scripted/{path}"),
        message: "expected value at line 1 column 1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracker_counts_overlap() {
        let tracker = Arc::new(ConcurrencyTracker::new());
        let (a, b) = tokio::join!(
            tracker.track(tokio::task::yield_now()),
            tracker.track(tokio::task::yield_now())
        );
        let _ = (a, b);
        assert_eq!(tracker.max_observed(), 2);
        assert_eq!(tracker.current(), 0);
    }

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let api = ScriptedTodoApi::builder()
            .user(1, "Bret")
            .fail_user(1, [transport_error("users/1"), decode_error("users/1")])
            .build();

        assert!(matches!(
            api.state.fetch_user(1),
            Err(FetchError::Transport { .. })
        ));
        assert!(matches!(
            api.state.fetch_user(1),
            Err(FetchError::Decode { .. })
        ));
        assert_eq!(api.state.fetch_user(1).unwrap().username, "Bret");
        assert_eq!(
            api.state.fetch_user(9),
            Err(FetchError::UserNotFound { user_id: 9 })
        );
        assert_eq!(api.user_calls(1), 3);
        assert_eq!(api.total_user_calls(), 4);
    }
}
