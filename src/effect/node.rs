//! Type-erased effect tree
//!
//! `Effect<A, E>` is a typed facade over [`Node`]. Success values and failures
//! travel through the interpreter as boxed `Any` values; the typed
//! constructors in the parent module are the only places that box and unbox,
//! so a successful downcast is an invariant of the tree rather than a
//! runtime check callers need to care about.

use super::async_op::{Canceler, RawResume};
use super::exit::Defect;
use super::parallelism::Parallelism;
use crate::context::Binding;
use crate::context::ServiceKey;
use crate::gauge::ResourceGauge;
use crate::schedule::Decision;
use std::any::{type_name, Any};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub(crate) type AnyValue = Box<dyn Any + Send>;
pub(crate) type AnyError = Box<dyn Any + Send>;

pub(crate) type Thunk = Arc<dyn Fn() -> AnyValue + Send + Sync>;
pub(crate) type FailThunk = Arc<dyn Fn() -> AnyError + Send + Sync>;
pub(crate) type TryThunk = Arc<dyn Fn() -> Result<AnyValue, AnyError> + Send + Sync>;
pub(crate) type Register = Arc<dyn Fn(RawResume) -> Canceler + Send + Sync>;
pub(crate) type MapFn = Arc<dyn Fn(AnyValue) -> AnyValue + Send + Sync>;
pub(crate) type BindFn = Arc<dyn Fn(AnyValue) -> Arc<Node> + Send + Sync>;
pub(crate) type MapErrorFn = Arc<dyn Fn(AnyError) -> AnyError + Send + Sync>;
pub(crate) type HandlerFn = Arc<dyn Fn(AnyError) -> Arc<Node> + Send + Sync>;
pub(crate) type DescribeFn = Arc<dyn Fn(&AnyError) -> String + Send + Sync>;
pub(crate) type ElementFn = Arc<dyn Fn(usize) -> Arc<Node> + Send + Sync>;
pub(crate) type CollectFn = Arc<dyn Fn(Vec<AnyValue>) -> AnyValue + Send + Sync>;
pub(crate) type ExtractFn =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<AnyValue> + Send + Sync>;

/// Retry policy with its error type erased.
pub(crate) trait ErasedSchedule: Send + Sync {
    fn decide(&self, attempt: u32, elapsed: Duration, error: &AnyError) -> Decision;
    fn jittered(&self, delay: Duration) -> Duration;
    fn max_retries(&self) -> Option<u32>;
    fn describe(&self) -> String;
}

/// Element iteration shared by `ForEach` and `ForEachPar`.
pub(crate) struct Elements {
    pub len: usize,
    pub build: ElementFn,
    pub collect: CollectFn,
}

pub(crate) enum Node {
    Succeed(Thunk),
    Fail(FailThunk),
    Die(Defect),
    Sync(Thunk),
    TrySync(TryThunk),
    Async(Register),
    Map(Arc<Node>, MapFn),
    FlatMap(Arc<Node>, BindFn),
    MapError(Arc<Node>, MapErrorFn),
    CatchError(Arc<Node>, HandlerFn),
    OrDie(Arc<Node>, DescribeFn),
    ForEach(Elements),
    ForEachPar(Elements, Parallelism),
    Retry(Arc<Node>, Arc<dyn ErasedSchedule>),
    Provide(Arc<Node>, Binding),
    Lookup(ServiceKey, ExtractFn),
    Track(Arc<Node>, ResourceGauge),
}

impl Node {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Node::Succeed(_) => "succeed",
            Node::Fail(_) => "fail",
            Node::Die(_) => "die",
            Node::Sync(_) => "sync",
            Node::TrySync(_) => "try_sync",
            Node::Async(_) => "async",
            Node::Map(..) => "map",
            Node::FlatMap(..) => "flat_map",
            Node::MapError(..) => "map_error",
            Node::CatchError(..) => "catch_error",
            Node::OrDie(..) => "or_die",
            Node::ForEach(_) => "for_each",
            Node::ForEachPar(..) => "for_each_par",
            Node::Retry(..) => "retry",
            Node::Provide(..) => "provide_service",
            Node::Lookup(..) => "service",
            Node::Track(..) => "track",
        }
    }

    /// Swap the single child out for a shared leaf and hand it to `out`.
    fn detach_child(&mut self, out: &mut Vec<Arc<Node>>) {
        match self {
            Node::Map(inner, _)
            | Node::FlatMap(inner, _)
            | Node::MapError(inner, _)
            | Node::CatchError(inner, _)
            | Node::OrDie(inner, _)
            | Node::Retry(inner, _)
            | Node::Provide(inner, _)
            | Node::Track(inner, _) => out.push(std::mem::replace(inner, detached_leaf())),
            _ => {}
        }
    }
}

fn detached_leaf() -> Arc<Node> {
    static LEAF: OnceLock<Arc<Node>> = OnceLock::new();
    Arc::clone(LEAF.get_or_init(|| Arc::new(Node::Die(Defect::AbandonedCallback))))
}

// Long combinator chains nest one `Arc<Node>` per call. Unlinking them on a
// worklist keeps dropping a chain from recursing once per level.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_child(&mut pending);
        while let Some(child) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(child) {
                node.detach_child(&mut pending);
            }
        }
    }
}

/// Recover a typed value from the erased representation.
pub(crate) fn unbox<T: 'static>(value: Box<dyn Any + Send>) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("effect tree carried a value that is not a {}", type_name::<T>()),
    }
}
