//! Fiber executor
//!
//! A [`Runtime`] interprets [`Effect`] values on a tokio runtime. Each run
//! starts a root fiber; `for_each_par` forks child fibers beneath it. The
//! runtime is an explicit object rather than global state, so tests and the
//! binary can each build one with their own services and observers.
//!
//! Exactly one [`Exit`] is reported per run. Interruption requested through a
//! [`FiberHandle`] before the result is decided always wins: the run reports
//! [`Exit::Interrupted`] and every child fiber, pending async operation and
//! retry delay beneath it is torn down first.

mod fiber;
mod for_each_par;
mod interpreter;
mod interrupt;
mod retry;


pub use fiber::{FiberEvent, FiberId, FiberStatus};
pub use interrupt::InterruptToken;

use crate::context::ServiceContext;
use crate::effect::{Defect, Effect, Exit, RunError};
use crate::error::{Error, Result};
use fiber::{lock, Fiber, FiberObserver, FiberRegistry};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

struct RuntimeInner {
    name: String,
    handle: Handle,
    registry: Arc<FiberRegistry>,
    services: ServiceContext,
}

/// Executes effects. Cheap to clone; clones share fibers and services.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// A runtime on the current tokio runtime with no base services.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start `effect` on a new root fiber.
    ///
    /// `sink` receives the terminal [`Exit`] exactly once.
    pub fn run<A, E, F>(&self, effect: Effect<A, E>, sink: F) -> FiberHandle
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let token = InterruptToken::new();
        let fiber = Fiber::root(
            Arc::clone(&self.inner.registry),
            self.inner.handle.clone(),
            self.inner.services.clone(),
            token.clone(),
        );
        let delivery = Arc::new(Mutex::new(false));
        let (done_tx, done_rx) = watch::channel(false);
        let handle = FiberHandle {
            id: fiber.id,
            token,
            delivery: Arc::clone(&delivery),
            done: done_rx,
        };

        debug!("{} running {:?} on {}", fiber.id, effect, self.inner.name);
        let node = effect.into_node();
        self.inner.handle.spawn(async move {
            let exit = interpreter::eval_catching(node, fiber.clone()).await;
            let exit = {
                let mut delivered = lock(&delivery);
                *delivered = true;
                fiber.settle(exit)
            };
            fiber.terminate(&exit);
            debug!("{} finished: {}", fiber.id, exit.label());
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| sink(Exit::from_raw(exit))));
            if let Err(payload) = delivered {
                warn!(
                    "{} exit sink panicked: {}",
                    fiber.id,
                    interpreter::panic_message(payload.as_ref())
                );
            }
            let _ = done_tx.send(true);
        });
        handle
    }

    /// Run `effect` and wait for its exit.
    pub async fn run_exit<A, E>(&self, effect: Effect<A, E>) -> Exit<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run(effect, move |exit| {
            let _ = tx.send(exit);
        });
        // The sender only disappears if the tokio runtime dropped the task.
        rx.await.unwrap_or(Exit::Died(Defect::AbandonedCallback))
    }

    /// Run `effect`, folding interruption and defects into the error.
    pub async fn run_to_result<A, E>(&self, effect: Effect<A, E>) -> std::result::Result<A, RunError<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.run_exit(effect).await.into_result()
    }

    /// Number of fibers (roots and children) currently running.
    pub fn live_fibers(&self) -> usize {
        self.inner.registry.live()
    }

    /// Live children of `id`, in fork order.
    pub fn children_of(&self, id: FiberId) -> Vec<FiberId> {
        self.inner.registry.children_of(id)
    }

    /// Interrupt every running fiber and wait until all have terminated.
    pub async fn shutdown(&self) {
        let roots = self.inner.registry.interrupt_roots();
        debug!("{} shutting down {} root fiber(s)", self.inner.name, roots);
        self.inner.registry.wait_idle().await;
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.name)
            .field("live_fibers", &self.live_fibers())
            .field("services", &self.inner.services)
            .finish()
    }
}

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    name: Option<String>,
    handle: Option<Handle>,
    observer: Option<FiberObserver>,
    services: ServiceContext,
}

impl RuntimeBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn fibers on `handle` instead of the current tokio runtime.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Receive every fiber start and termination.
    pub fn on_fiber_event<F>(mut self, observer: F) -> Self
    where
        F: Fn(&FiberEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Bind `service` for every effect this runtime runs.
    pub fn with_service<S>(mut self, service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.services = self.services.with(service);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?,
        };
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                name: self.name.unwrap_or_else(|| "fibrant".to_string()),
                handle,
                registry: Arc::new(FiberRegistry::new(self.observer)),
                services: self.services,
            }),
        })
    }
}

/// Control over one running root fiber.
#[derive(Clone)]
pub struct FiberHandle {
    id: FiberId,
    token: InterruptToken,
    delivery: Arc<Mutex<bool>>,
    done: watch::Receiver<bool>,
}

impl FiberHandle {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Request interruption. Idempotent; a no-op once the exit was decided.
    pub fn interrupt(&self) {
        let delivered = lock(&self.delivery);
        if !*delivered && !self.token.is_interrupted() {
            debug!("Interrupting {}", self.id);
            self.token.interrupt();
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the exit has been delivered to the sink. A sink that panics
    /// still counts as delivered.
    pub async fn join(&self) {
        let mut done = self.done.clone();
        // An error means the task was dropped with its runtime.
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub async fn interrupt_and_wait(&self) {
        self.interrupt();
        self.join().await;
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}
