//! Effect tree interpreter
//!
//! `eval` is a loop over the current node and an explicit stack of pending
//! continuations, so the depth of a combinator chain or of a recursive
//! `flat_map` never grows the native stack. Every step first checks the
//! fiber's interrupt token, so an interrupted fiber stops at the next step
//! it takes. Suspension points (`Async`, retry delays and waiting on a gauge)
//! also race against the token.
//!
//! Only `ForEachPar`, `Retry` and `Track` start a nested interpreter; each of
//! them owns a scope that has to be entered and left around its inner effect.

use super::fiber::Fiber;
use super::{for_each_par, retry};
use crate::context::ServiceContext;
use crate::effect::node::{
    AnyValue, BindFn, CollectFn, DescribeFn, ElementFn, HandlerFn, MapErrorFn, MapFn, Node,
    Register,
};
use crate::effect::{Defect, RawExit};
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Work left to do once the node under evaluation settles.
enum Frame {
    Map(MapFn),
    FlatMap(BindFn),
    MapError(MapErrorFn),
    CatchError(HandlerFn),
    OrDie(DescribeFn),
    /// Remaining elements of a sequential `for_each`.
    ForEach {
        next: usize,
        len: usize,
        build: ElementFn,
        collect: CollectFn,
        values: Vec<AnyValue>,
    },
    /// Services visible outside a `provide_service` scope.
    RestoreContext(ServiceContext),
}

/// Result of a single step: either another node to evaluate or an exit.
enum Step {
    Continue(Arc<Node>),
    Settled(RawExit),
}

pub(crate) fn eval(node: Arc<Node>, fiber: Fiber) -> BoxFuture<'static, RawExit> {
    run_loop(node, fiber).boxed()
}

async fn run_loop(root: Arc<Node>, mut fiber: Fiber) -> RawExit {
    let mut stack: Vec<Frame> = Vec::new();
    let mut current = root;

    'step: loop {
        let step = if fiber.token.is_interrupted() {
            Step::Settled(RawExit::Interrupted)
        } else {
            advance(&current, &mut fiber, &mut stack).await
        };

        let mut exit = match step {
            Step::Continue(next) => {
                current = next;
                continue 'step;
            }
            Step::Settled(exit) => exit,
        };

        while let Some(frame) = stack.pop() {
            exit = match (frame, exit) {
                (Frame::RestoreContext(services), exit) => {
                    fiber.services = services;
                    exit
                }
                (Frame::Map(f), RawExit::Success(value)) => RawExit::Success(f(value)),
                (Frame::FlatMap(f), RawExit::Success(value)) => {
                    current = f(value);
                    continue 'step;
                }
                (
                    Frame::ForEach {
                        next,
                        len,
                        build,
                        collect,
                        mut values,
                    },
                    RawExit::Success(value),
                ) => {
                    values.push(value);
                    if next == len {
                        RawExit::Success(collect(values))
                    } else {
                        current = build(next);
                        stack.push(Frame::ForEach {
                            next: next + 1,
                            len,
                            build,
                            collect,
                            values,
                        });
                        continue 'step;
                    }
                }
                (Frame::MapError(f), RawExit::Failure(error)) => RawExit::Failure(f(error)),
                (Frame::CatchError(handler), RawExit::Failure(error)) => {
                    current = handler(error);
                    continue 'step;
                }
                (Frame::OrDie(describe), RawExit::Failure(error)) => {
                    RawExit::Died(Defect::Unhandled(describe(&error)))
                }
                (_, exit) => exit,
            };
        }
        return exit;
    }
}

async fn advance(node: &Arc<Node>, fiber: &mut Fiber, stack: &mut Vec<Frame>) -> Step {
    let exit = match &**node {
        Node::Succeed(value) => RawExit::Success(value()),
        Node::Fail(error) => RawExit::Failure(error()),
        Node::Die(defect) => RawExit::Died(defect.clone()),
        Node::Sync(thunk) => RawExit::Success(thunk()),
        Node::TrySync(thunk) => match thunk() {
            Ok(value) => RawExit::Success(value),
            Err(error) => RawExit::Failure(error),
        },
        Node::Async(register) => run_async(register, fiber).await,
        Node::Map(inner, f) => {
            stack.push(Frame::Map(Arc::clone(f)));
            return Step::Continue(Arc::clone(inner));
        }
        Node::FlatMap(inner, f) => {
            stack.push(Frame::FlatMap(Arc::clone(f)));
            return Step::Continue(Arc::clone(inner));
        }
        Node::MapError(inner, f) => {
            stack.push(Frame::MapError(Arc::clone(f)));
            return Step::Continue(Arc::clone(inner));
        }
        Node::CatchError(inner, handler) => {
            stack.push(Frame::CatchError(Arc::clone(handler)));
            return Step::Continue(Arc::clone(inner));
        }
        Node::OrDie(inner, describe) => {
            stack.push(Frame::OrDie(Arc::clone(describe)));
            return Step::Continue(Arc::clone(inner));
        }
        Node::ForEach(elements) if elements.len == 0 => {
            RawExit::Success((elements.collect)(Vec::new()))
        }
        Node::ForEach(elements) => {
            stack.push(Frame::ForEach {
                next: 1,
                len: elements.len,
                build: Arc::clone(&elements.build),
                collect: Arc::clone(&elements.collect),
                values: Vec::with_capacity(elements.len),
            });
            return Step::Continue((elements.build)(0));
        }
        Node::ForEachPar(elements, parallelism) => {
            for_each_par::run(elements, *parallelism, fiber).await
        }
        Node::Retry(inner, schedule) => retry::run(inner, schedule.as_ref(), fiber).await,
        Node::Provide(inner, binding) => {
            stack.push(Frame::RestoreContext(fiber.services.clone()));
            *fiber = fiber.with_binding(binding.clone());
            return Step::Continue(Arc::clone(inner));
        }
        Node::Lookup(key, extract) => {
            match fiber.services.lookup(*key).and_then(|bound| extract(bound)) {
                Some(service) => RawExit::Success(service),
                None => {
                    debug!("{} has no binding for {}", fiber.id, key.name());
                    RawExit::Died(Defect::MissingService {
                        service: key.name(),
                    })
                }
            }
        }
        Node::Track(inner, gauge) => {
            let guard = tokio::select! {
                biased;
                _ = fiber.token.interrupted() => return Step::Settled(RawExit::Interrupted),
                guard = gauge.acquire() => guard,
            };
            let exit = eval(Arc::clone(inner), fiber.clone()).await;
            guard.release();
            exit
        }
    };
    Step::Settled(exit)
}

/// Evaluate `node` and convert a panic into a defect.
pub(crate) async fn eval_catching(node: Arc<Node>, fiber: Fiber) -> RawExit {
    match AssertUnwindSafe(eval(node, fiber)).catch_unwind().await {
        Ok(exit) => exit,
        Err(payload) => RawExit::Died(Defect::Panic(panic_message(payload.as_ref()))),
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn run_async(register: &Register, fiber: &Fiber) -> RawExit {
    let (resume, completion) = oneshot::channel();
    let canceler = register(resume);

    tokio::select! {
        biased;
        _ = fiber.token.interrupted() => {
            debug!("{} interrupted while suspended", fiber.id);
            canceler.cancel();
            RawExit::Interrupted
        }
        outcome = completion => match outcome {
            Ok(Ok(value)) => RawExit::Success(value),
            Ok(Err(error)) => RawExit::Failure(error),
            Err(_) => RawExit::Died(Defect::AbandonedCallback),
        },
    }
}
