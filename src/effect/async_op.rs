//! Completion callbacks and cancel actions for `Effect::async_register`

use super::node::{AnyError, AnyValue};
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::oneshot;

pub(crate) type RawResume = oneshot::Sender<Result<AnyValue, AnyError>>;

/// Single-use completion callback handed to an async registration.
///
/// Completing consumes the callback. If the fiber has already been
/// interrupted the outcome is silently discarded.
pub struct Resume<A, E> {
    sender: RawResume,
    _types: PhantomData<fn(A, E)>,
}

impl<A, E> Resume<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(sender: RawResume) -> Self {
        Self {
            sender,
            _types: PhantomData,
        }
    }

    pub fn succeed(self, value: A) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: E) {
        self.complete(Err(error));
    }

    pub fn complete(self, outcome: Result<A, E>) {
        let erased = match outcome {
            Ok(value) => Ok(Box::new(value) as AnyValue),
            Err(error) => Err(Box::new(error) as AnyError),
        };
        // The receiver is gone once the fiber stopped waiting.
        let _ = self.sender.send(erased);
    }

    /// Whether the waiting fiber has stopped listening.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A, E> fmt::Debug for Resume<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("abandoned", &self.sender.is_closed())
            .finish()
    }
}

/// Action run when a suspended async operation is interrupted.
pub struct Canceler(Option<Box<dyn FnOnce() + Send>>);

impl Canceler {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Canceler(Some(Box::new(cancel)))
    }

    /// For operations that cannot be aborted.
    pub fn none() -> Self {
        Canceler(None)
    }

    pub(crate) fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Canceler")
            .field(&if self.0.is_some() { "<action>" } else { "<none>" })
            .finish()
    }
}
