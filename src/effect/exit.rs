//! Terminal outcomes of running an effect

use super::node::{unbox, AnyError, AnyValue};
use thiserror::Error;

/// A programming error surfaced while interpreting an effect.
///
/// Defects are never delivered as typed failures and cannot be intercepted
/// by `catch_error`; they always propagate to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Defect {
    #[error("service `{service}` was never provided to this effect")]
    MissingService { service: &'static str },

    #[error("unhandled failure: {0}")]
    Unhandled(String),

    #[error("fiber panicked: {0}")]
    Panic(String),

    #[error("asynchronous operation dropped its completion callback")]
    AbandonedCallback,

    #[error("result slot {index} was written twice")]
    SlotConflict { index: usize },

    #[error("result slot {index} was never written")]
    MissingResult { index: usize },

    #[error("{0}")]
    Custom(String),
}

/// Untyped exit used inside the interpreter.
pub(crate) enum RawExit {
    Success(AnyValue),
    Failure(AnyError),
    Interrupted,
    Died(Defect),
}

impl RawExit {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            RawExit::Success(_) => "success",
            RawExit::Failure(_) => "failure",
            RawExit::Interrupted => "interrupted",
            RawExit::Died(_) => "died",
        }
    }
}

/// How a fiber terminated.
#[derive(Debug, PartialEq)]
pub enum Exit<A, E> {
    Success(A),
    Failure(E),
    Interrupted,
    Died(Defect),
}

impl<A, E> Exit<A, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Exit::Interrupted)
    }

    pub fn success(self) -> Option<A> {
        match self {
            Exit::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(self) -> Option<E> {
        match self {
            Exit::Failure(error) => Some(error),
            _ => None,
        }
    }

    /// Collapse into a `Result`, folding interruption and defects into the error.
    pub fn into_result(self) -> Result<A, RunError<E>> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(error) => Err(RunError::Failed(error)),
            Exit::Interrupted => Err(RunError::Interrupted),
            Exit::Died(defect) => Err(RunError::Died(defect)),
        }
    }
}

impl<A: 'static, E: 'static> Exit<A, E> {
    pub(crate) fn from_raw(raw: RawExit) -> Self {
        match raw {
            RawExit::Success(value) => Exit::Success(unbox(value)),
            RawExit::Failure(error) => Exit::Failure(unbox(error)),
            RawExit::Interrupted => Exit::Interrupted,
            RawExit::Died(defect) => Exit::Died(defect),
        }
    }
}

/// Error form of a non-successful [`Exit`].
#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("effect failed: {0}")]
    Failed(E),

    #[error("effect was interrupted")]
    Interrupted,

    #[error("effect died: {0}")]
    Died(Defect),
}

