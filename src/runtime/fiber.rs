//! Fiber identities and the registry that tracks live fibers
//!
//! The registry is an arena keyed by [`FiberId`]. Each record knows its
//! parent, its live children and its interrupt token. Records are removed when
//! the fiber terminates; children of a fiber always terminate first because a
//! parent only finishes after joining every child it forked.

use super::interrupt::InterruptToken;
use crate::context::{Binding, ServiceContext};
use crate::effect::RawExit;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::trace;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unique identifier for a fiber within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.0)
    }
}

/// How a fiber ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    Succeeded,
    Failed,
    Interrupted,
    Died,
}

impl FiberStatus {
    pub(crate) fn of(exit: &RawExit) -> Self {
        match exit {
            RawExit::Success(_) => FiberStatus::Succeeded,
            RawExit::Failure(_) => FiberStatus::Failed,
            RawExit::Interrupted => FiberStatus::Interrupted,
            RawExit::Died(_) => FiberStatus::Died,
        }
    }
}

/// Lifecycle notifications delivered to the runtime's observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberEvent {
    Started {
        id: FiberId,
        parent: Option<FiberId>,
    },
    Terminated {
        id: FiberId,
        status: FiberStatus,
    },
}

pub(crate) type FiberObserver = Arc<dyn Fn(&FiberEvent) + Send + Sync>;

struct FiberRecord {
    parent: Option<FiberId>,
    children: BTreeSet<FiberId>,
    token: InterruptToken,
}

pub(crate) struct FiberRegistry {
    next_id: AtomicU64,
    fibers: Mutex<HashMap<FiberId, FiberRecord>>,
    observer: Option<FiberObserver>,
    idle: Notify,
}

impl FiberRegistry {
    pub(crate) fn new(observer: Option<FiberObserver>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fibers: Mutex::new(HashMap::new()),
            observer,
            idle: Notify::new(),
        }
    }

    pub(crate) fn register(&self, parent: Option<FiberId>, token: InterruptToken) -> FiberId {
        let id = FiberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut fibers = lock(&self.fibers);
            if let Some(record) = parent.and_then(|parent| fibers.get_mut(&parent)) {
                record.children.insert(id);
            }
            fibers.insert(
                id,
                FiberRecord {
                    parent,
                    children: BTreeSet::new(),
                    token,
                },
            );
        }
        match parent {
            Some(parent) => trace!("{} forked {}", parent, id),
            None => trace!("{} started", id),
        }
        self.emit(FiberEvent::Started { id, parent });
        id
    }

    pub(crate) fn terminate(&self, id: FiberId, status: FiberStatus) {
        let now_idle = {
            let mut fibers = lock(&self.fibers);
            if let Some(record) = fibers.remove(&id) {
                if let Some(parent) = record.parent.and_then(|parent| fibers.get_mut(&parent)) {
                    parent.children.remove(&id);
                }
            }
            fibers.is_empty()
        };
        trace!("{} terminated: {:?}", id, status);
        self.emit(FiberEvent::Terminated { id, status });
        if now_idle {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn live(&self) -> usize {
        lock(&self.fibers).len()
    }

    pub(crate) fn children_of(&self, id: FiberId) -> Vec<FiberId> {
        lock(&self.fibers)
            .get(&id)
            .map(|record| record.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Interrupt every root fiber; children follow through their tokens.
    pub(crate) fn interrupt_roots(&self) -> usize {
        let roots: Vec<InterruptToken> = lock(&self.fibers)
            .values()
            .filter(|record| record.parent.is_none())
            .map(|record| record.token.clone())
            .collect();
        for token in &roots {
            token.interrupt();
        }
        roots.len()
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn emit(&self, event: FiberEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

/// Everything the interpreter needs while running one fiber.
#[derive(Clone)]
pub(crate) struct Fiber {
    pub(crate) id: FiberId,
    pub(crate) token: InterruptToken,
    pub(crate) services: ServiceContext,
    pub(crate) registry: Arc<FiberRegistry>,
    pub(crate) handle: Handle,
}

impl Fiber {
    pub(crate) fn root(
        registry: Arc<FiberRegistry>,
        handle: Handle,
        services: ServiceContext,
        token: InterruptToken,
    ) -> Self {
        let id = registry.register(None, token.clone());
        Self {
            id,
            token,
            services,
            registry,
            handle,
        }
    }

    /// Register a child fiber interrupted through `token`.
    pub(crate) fn fork(&self, token: InterruptToken) -> Fiber {
        let id = self.registry.register(Some(self.id), token.clone());
        Fiber {
            id,
            token,
            services: self.services.clone(),
            registry: Arc::clone(&self.registry),
            handle: self.handle.clone(),
        }
    }

    pub(crate) fn with_binding(&self, binding: Binding) -> Fiber {
        trace!("{} provides {}", self.id, binding.key().name());
        Fiber {
            services: self.services.with_binding(binding),
            ..self.clone()
        }
    }

    /// Interruption wins over any outcome decided after it was requested.
    pub(crate) fn settle(&self, exit: RawExit) -> RawExit {
        if self.token.is_interrupted() {
            RawExit::Interrupted
        } else {
            exit
        }
    }

    pub(crate) fn terminate(&self, exit: &RawExit) {
        self.registry.terminate(self.id, FiberStatus::of(exit));
    }
}
