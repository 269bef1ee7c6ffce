//! Sorting store failures into retryable, conflict and fatal.

use super::StoreError;

/// PostgreSQL SQLSTATE codes the classifier knows about.
pub mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// How the executor treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient contention; the attempt may be repeated.
    Retryable,
    /// Duplicate-key style business conflict; surfaced as a domain failure.
    Conflict,
    /// Anything else; surfaced immediately.
    Fatal,
}

pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        sqlstate::SERIALIZATION_FAILURE
        | sqlstate::DEADLOCK_DETECTED
        | sqlstate::LOCK_NOT_AVAILABLE => ErrorClass::Retryable,
        sqlstate::UNIQUE_VIOLATION => ErrorClass::Conflict,
        _ => ErrorClass::Fatal,
    }
}

/// Default classifier: errors without a SQLSTATE are fatal.
pub fn classify<E: StoreError + ?Sized>(err: &E) -> ErrorClass {
    err.sqlstate().map(classify_sqlstate).unwrap_or(ErrorClass::Fatal)
}
