//! Effect values: inert descriptions of asynchronous, fallible, cancellable work
//!
//! An [`Effect<A, E>`] describes a computation that succeeds with an `A`, fails
//! with an `E`, may be interrupted, and may depend on services bound with
//! [`Effect::provide_service`]. Building an effect performs no I/O; nothing
//! happens until it is handed to a [`Runtime`](crate::runtime::Runtime).
//!
//! Effects are immutable and cheap to clone, and every closure they hold is
//! `Fn`, so the same value can be run many times. `retry` depends on this.
//!
//! # Examples
//!
//! ```
//! use fibrant::effect::{Effect, Exit};
//! use fibrant::runtime::Runtime;
//!
//! # tokio_test_block_on(async {
//! let program = Effect::<i32, String>::succeed(20)
//!     .map(|x| x * 2)
//!     .flat_map(|x| Effect::succeed(x + 2));
//!
//! let runtime = Runtime::new().unwrap();
//! assert_eq!(runtime.run_exit(program).await, Exit::Success(42));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

mod async_op;
mod exit;
pub(crate) mod node;
mod parallelism;

pub use async_op::{Canceler, Resume};
pub use exit::{Defect, Exit, RunError};
pub use parallelism::Parallelism;

pub(crate) use exit::RawExit;

use crate::context::{Binding, ServiceKey};
use crate::gauge::ResourceGauge;
use crate::schedule::{Decision, Schedule};
use async_op::RawResume;
use node::{unbox, AnyError, AnyValue, Elements, ErasedSchedule, Node};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// An inert description of a computation producing `A` or failing with `E`.
pub struct Effect<A, E> {
    node: Arc<Node>,
    _types: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _types: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("root", &self.node.label())
            .finish()
    }
}

/// Closed error enums expose a discriminator so handlers and retry filters
/// can match on the kind of failure.
pub trait ErrorTag {
    type Tag: PartialEq + Send + Sync + 'static;

    fn tag(&self) -> Self::Tag;
}

impl<A, E> Effect<A, E> {
    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
            _types: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub(crate) fn into_node(self) -> Arc<Node> {
        self.node
    }

    /// An effect that dies with the given defect when run.
    pub fn die(message: impl Into<String>) -> Self {
        Self::from_node(Node::Die(Defect::Custom(message.into())))
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Always succeeds with `value`.
    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_node(Node::Succeed(Arc::new(move || {
            Box::new(value.clone()) as AnyValue
        })))
    }

    /// Always fails with `error`.
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::from_node(Node::Fail(Arc::new(move || Box::new(error.clone()) as AnyError)))
    }

    /// A synchronous computation, evaluated each time the effect runs.
    pub fn sync<F>(thunk: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Node::Sync(Arc::new(move || Box::new(thunk()) as AnyValue)))
    }

    /// A synchronous computation that may fail.
    pub fn try_sync<F>(thunk: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Node::TrySync(Arc::new(move || match thunk() {
            Ok(value) => Ok(Box::new(value) as AnyValue),
            Err(error) => Err(Box::new(error) as AnyError),
        })))
    }

    /// Wraps one external asynchronous operation.
    ///
    /// `register` receives a single-use [`Resume`] and must return the
    /// [`Canceler`] to run if the fiber is interrupted first.
    pub fn async_register<F>(register: F) -> Self
    where
        F: Fn(Resume<A, E>) -> Canceler + Send + Sync + 'static,
    {
        Self::from_node(Node::Async(Arc::new(move |sender: RawResume| {
            register(Resume::new(sender))
        })))
    }

    /// Runs a future produced by `make` as a task; interruption aborts the task.
    pub fn from_future<F, Fut>(make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        Self::async_register(move |resume| {
            let future = make();
            let task = tokio::spawn(async move {
                resume.complete(future.await);
            });
            Canceler::new(move || task.abort())
        })
    }

    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Effect::from_node(Node::Map(
            self.node,
            Arc::new(move |value: AnyValue| Box::new(f(unbox::<A>(value))) as AnyValue),
        ))
    }

    /// Sequences `f` after this effect; `f` only ever sees a success value.
    pub fn flat_map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        Effect::from_node(Node::FlatMap(
            self.node,
            Arc::new(move |value: AnyValue| f(unbox::<A>(value)).node),
        ))
    }

    pub fn map_error<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Effect::from_node(Node::MapError(
            self.node,
            Arc::new(move |error: AnyError| Box::new(f(unbox::<E>(error))) as AnyError),
        ))
    }

    /// Replaces a failure with the effect built by `handler`.
    ///
    /// Interruption and defects pass through untouched.
    pub fn catch_error<E2, F>(self, handler: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    {
        Effect::from_node(Node::CatchError(
            self.node,
            Arc::new(move |error: AnyError| handler(unbox::<E>(error)).node),
        ))
    }

    /// Recovers only from failures matching `predicate`.
    pub fn catch_if<P, F>(self, predicate: P, handler: F) -> Self
    where
        E: Clone + Sync,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(E) -> Effect<A, E> + Send + Sync + 'static,
    {
        self.catch_error(move |error| {
            if predicate(&error) {
                handler(error)
            } else {
                Effect::fail(error)
            }
        })
    }

    /// Recovers only from failures whose discriminator equals `tag`.
    pub fn catch_tag<F>(self, tag: E::Tag, handler: F) -> Self
    where
        E: ErrorTag + Clone + Sync,
        F: Fn(E) -> Effect<A, E> + Send + Sync + 'static,
    {
        self.catch_if(move |error| error.tag() == tag, handler)
    }

    /// Turns any failure into a defect.
    pub fn or_die<E2>(self) -> Effect<A, E2>
    where
        E: fmt::Debug,
        E2: Send + 'static,
    {
        Effect::from_node(Node::OrDie(
            self.node,
            Arc::new(|error: &AnyError| match error.downcast_ref::<E>() {
                Some(error) => format!("{error:?}"),
                None => "unknown failure".to_string(),
            }),
        ))
    }

    /// Reruns this effect on failure for as long as `schedule` allows.
    pub fn retry(self, schedule: Schedule<E>) -> Self
    where
        E: Sync,
    {
        Self::from_node(Node::Retry(self.node, Arc::new(schedule)))
    }

    /// Binds `service` for this effect and everything it runs.
    pub fn provide_service<S>(self, service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Self::from_node(Node::Provide(self.node, Binding::new(service)))
    }

    /// Holds a use of `gauge` for as long as this effect runs.
    pub fn track(self, gauge: &ResourceGauge) -> Self {
        Self::from_node(Node::Track(self.node, gauge.clone()))
    }
}

impl<E> Effect<(), E>
where
    E: Send + 'static,
{
    /// Suspends for `duration`; interruption cancels the timer.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_future(move || async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}

impl<A, E> Effect<Vec<A>, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Runs `f` for each item, one after another, collecting results in order.
    pub fn for_each<T, I, F>(items: I, f: F) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Effect<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Node::ForEach(elements(items, f)))
    }

    /// Runs `f` for each item with at most `parallelism` items in flight.
    ///
    /// Results keep the input order. The first failure interrupts every other
    /// running item.
    pub fn for_each_par<T, I, F>(items: I, f: F, parallelism: Parallelism) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Effect<A, E> + Send + Sync + 'static,
    {
        Self::from_node(Node::ForEachPar(elements(items, f), parallelism))
    }
}

fn elements<A, E, T, I, F>(items: I, f: F) -> Elements
where
    A: Send + 'static,
    I: IntoIterator<Item = T>,
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Effect<A, E> + Send + Sync + 'static,
{
    let items: Arc<Vec<T>> = Arc::new(items.into_iter().collect());
    let len = items.len();
    Elements {
        len,
        build: Arc::new(move |index: usize| f(items[index].clone()).node),
        collect: Arc::new(|values: Vec<AnyValue>| {
            Box::new(values.into_iter().map(unbox::<A>).collect::<Vec<A>>()) as AnyValue
        }),
    }
}

/// Resolves the bound implementation of `S`.
///
/// Running this without a binding for `S` is a defect
/// ([`Defect::MissingService`]), not a typed failure.
pub fn service<S, E>() -> Effect<Arc<S>, E>
where
    S: ?Sized + Send + Sync + 'static,
    E: Send + 'static,
{
    Effect::from_node(Node::Lookup(
        ServiceKey::of::<S>(),
        Arc::new(|bound: &(dyn Any + Send + Sync)| {
            bound
                .downcast_ref::<Arc<S>>()
                .map(|service| Box::new(Arc::clone(service)) as AnyValue)
        }),
    ))
}

/// Looks up `S` and continues with the effect `f` builds from it.
pub fn service_with<S, A, E, F>(f: F) -> Effect<A, E>
where
    S: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    E: Send + 'static,
    F: Fn(Arc<S>) -> Effect<A, E> + Send + Sync + 'static,
{
    service::<S, E>().flat_map(f)
}

impl<E> ErasedSchedule for Schedule<E>
where
    E: Send + Sync + 'static,
{
    fn decide(&self, attempt: u32, elapsed: Duration, error: &AnyError) -> Decision {
        match error.downcast_ref::<E>() {
            Some(error) => Schedule::decide(self, attempt, elapsed, error),
            None => Decision::Stop,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        self.apply_jitter(delay)
    }

    fn max_retries(&self) -> Option<u32> {
        Schedule::max_retries(self)
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_building_effects_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let effect = Effect::<usize, String>::sync(move || counter.fetch_add(1, Ordering::SeqCst))
            .map(|n| n + 1)
            .flat_map(|n| Effect::succeed(n * 2))
            .retry(Schedule::fixed(Duration::from_millis(1)).with_max_retries(3));
        let _copies = vec![effect.clone(), effect.clone()];

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(effect.node().label(), "retry");
    }

    #[test]
    fn test_from_future_does_not_poll_on_construction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _effect = Effect::<(), String>::from_future(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_debug_shows_root_node() {
        let effect = Effect::<i32, String>::succeed(1).map(|x| x + 1);
        assert_eq!(format!("{effect:?}"), "Effect { root: \"map\" }");
    }

    #[test]
    fn test_for_each_par_records_element_count() {
        let effect = Effect::<Vec<i32>, String>::for_each_par(
            vec![1, 2, 3],
            |x| Effect::succeed(x),
            Parallelism::Unbounded,
        );
        match &**effect.node() {
            Node::ForEachPar(elements, parallelism) => {
                assert_eq!(elements.len, 3);
                assert_eq!(*parallelism, Parallelism::Unbounded);
            }
            other => panic!("unexpected node {}", other.label()),
        }
    }
}
