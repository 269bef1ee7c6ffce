//! Error types for transactional execution
use std::fmt;
/// The step of an attempt that produced a fatal store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Inside the unit of work.
    Work,
    /// While committing.
    Commit,
}
impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Work => "work",
            Stage::Commit => "commit",
        }
    }
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
/// Outcome of a failed unit of work, as reported by the work itself.
#[derive(Debug)]
pub enum WorkError<E> {
    /// A store call failed; the executor classifies it.
    Store(E),
    /// A targeted row did not exist. Never retried.
    NotFound(String),
    /// A business rule rejected the change. Never retried.
    Conflict(String),
}
impl<E> From<E> for WorkError<E> {
    fn from(err: E) -> Self {
        WorkError::Store(err)
    }
}
impl<E: fmt::Display> fmt::Display for WorkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{}", e),
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::Conflict(what) => write!(f, "conflict: {}", what),
        }
    }
}
impl<E: std::error::Error + 'static> std::error::Error for WorkError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}
/// Terminal error returned by [`TransactionExecutor::execute`](crate::TransactionExecutor::execute).
#[derive(Debug)]
pub enum TxError<E> {
    /// The caller cancelled before the given attempt (1-based) started.
    Cancelled { attempt: usize },
    /// The caller's deadline passed before the given attempt (1-based) started.
    DeadlineExceeded { attempt: usize },
    /// The unit of work reported a missing row.
    NotFound(String),
    /// A business conflict raised by the unit of work.
    Conflict(String),
    /// A store error classified as a conflict, such as a unique violation. Never retried.
    Duplicate { stage: Stage, source: E },
    /// The store could not open a transaction.
    Begin(E),
    /// A non-retryable store error.
    Fatal { stage: Stage, source: E },
    /// Every attempt hit a retryable error.
    Exhausted { attempts: usize, last: E },
}
impl<E: fmt::Display> fmt::Display for TxError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled { attempt } => write!(f, "cancelled before attempt {}", attempt),
            Self::DeadlineExceeded { attempt } => {
                write!(f, "deadline exceeded before attempt {}", attempt)
            }
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::Conflict(what) => write!(f, "conflict: {}", what),
            Self::Duplicate { source, .. } => write!(f, "conflict: {}", source),
            Self::Begin(e) => write!(f, "failed to begin transaction: {}", e),
            Self::Fatal { stage, source } => write!(f, "{} failed: {}", stage, source),
            Self::Exhausted { attempts, last } => {
                write!(f, "operation failed after {} attempts; last error: {}", attempts, last)
            }
        }
    }
}
impl<E: std::error::Error + 'static> std::error::Error for TxError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Begin(e)
            | Self::Fatal { source: e, .. }
            | Self::Duplicate { source: e, .. }
            | Self::Exhausted { last: e, .. } => {
                Some(e)
            }
            _ => None,
        }
    }
}
impl<E> TxError<E> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Duplicate { .. })
    }
    /// True for both explicit cancellation and an expired deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
    /// True when a store error ended the call without retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Begin(_) | Self::Fatal { .. })
    }
    /// Borrow the underlying store error, if one ended the call.
    pub fn store_error(&self) -> Option<&E> {
        match self {
            Self::Begin(e)
            | Self::Fatal { source: e, .. }
            | Self::Duplicate { source: e, .. }
            | Self::Exhausted { last: e, .. } => {
                Some(e)
            }
            _ => None,
        }
    }
    pub fn into_store_error(self) -> Option<E> {
        match self {
            Self::Begin(e)
            | Self::Fatal { source: e, .. }
            | Self::Duplicate { source: e, .. }
            | Self::Exhausted { last: e, .. } => {
                Some(e)
            }
            _ => None,
        }
    }
    /// Attempt count for `Exhausted`.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
