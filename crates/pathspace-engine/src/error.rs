//! Faults raised while exploring a path.

use thiserror::Error;

/// Fault raised by the exploration primitives.
#[derive(Debug, Clone, Error)]
pub enum ExplorationError {
    /// The per-path deadline passed. The path counts as unknown.
    #[error("path execution timed out after {decisions} decisions")]
    PathTimeout { decisions: usize },

    /// A replayed path disagreed with an earlier execution of the same path.
    #[error("nondeterministic execution: {detail}")]
    NotDeterministic { detail: String },

    /// The path is void and must be discarded without a verdict.
    #[error("attempt ignored: {reason}")]
    IgnoreAttempt { reason: String },

    /// The solver could not decide a query whose answer soundness depends on.
    #[error("solver returned unknown satisfiability")]
    UnknownSatisfiability,

    /// An engine invariant does not hold.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// A session was entered while another one is still active on this thread.
    #[error("an exploration session is already active on this thread")]
    SessionActive,
}

impl ExplorationError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ExplorationError::Internal {
            message: message.into(),
        }
    }

    /// Whether the whole run must stop rather than just this path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExplorationError::UnknownSatisfiability
                | ExplorationError::Internal { .. }
                | ExplorationError::SessionActive
        )
    }
}

pub type ExplorationResult<T> = Result<T, ExplorationError>;

/// How one execution of the program under test failed.
#[derive(Debug, Clone, Error)]
pub enum PathError {
    #[error(transparent)]
    Engine(#[from] ExplorationError),

    /// The program itself raised a fault, such as a division by zero.
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },
}

impl PathError {
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PathError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
