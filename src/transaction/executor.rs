//! Retrying transactional executor.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (first try included).
//! - Each attempt opens a fresh transaction, runs the unit of work and commits. Any failure
//!   rolls the attempt back before the outcome is decided.
//! - `WorkError::NotFound` and `WorkError::Conflict` end the call immediately.
//! - Store errors go through the classifier. `Retryable` sleeps `backoff.delay_after(attempt)`
//!   (jittered) and tries again; `Conflict` and `Fatal` end the call.
//! - A failure to begin a transaction is never retried.
//! - The [`CallContext`] is checked before every attempt; a running attempt is not interrupted.
//!
//! ```rust
//! use batchline::transaction::{
//!     CallContext, ScriptedError, ScriptedStore, Statement, Transaction, TransactionExecutor,
//!     UnitOfWork, WorkError,
//! };
//! use batchline::InstantSleeper;
//!
//! struct Touch;
//!
//! #[async_trait::async_trait]
//! impl UnitOfWork<batchline::transaction::ScriptedTx> for Touch {
//!     type Output = u64;
//!     async fn run(
//!         &self,
//!         tx: &mut batchline::transaction::ScriptedTx,
//!     ) -> Result<u64, WorkError<ScriptedError>> {
//!         Ok(tx.execute(&Statement::new("UPDATE tasks SET status = true")).await?)
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = ScriptedStore::new();
//! store.push_execute(Err(ScriptedError::serialization_failure()));
//! let executor = TransactionExecutor::builder(store.clone())
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! assert_eq!(executor.execute(&CallContext::new(), &Touch).await.unwrap(), 1);
//! assert_eq!(store.begins(), 2);
//! # });
//! ```

use super::classify::{classify, ErrorClass};
use super::context::{CallContext, Interrupted};
use super::{StoreError, Transaction, TransactionStore, UnitOfWork};
use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Stage, TxError, WorkError};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::sync::Arc;

type Classifier<E> = Arc<dyn Fn(&E) -> ErrorClass + Send + Sync>;

/// Runs units of work inside transactions, retrying transient contention.
pub struct TransactionExecutor<S: TransactionStore> {
    store: S,
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classify: Classifier<S::Error>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: TransactionStore> std::fmt::Debug for TransactionExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("classify", &"<classifier>")
            .finish()
    }
}

impl<S: TransactionStore> TransactionExecutor<S> {
    pub fn builder(store: S) -> TransactionExecutorBuilder<S> {
        TransactionExecutorBuilder::new(store)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `work` in a transaction, retrying retryable store failures.
    pub async fn execute<W>(&self, ctx: &CallContext, work: &W) -> Result<W::Output, TxError<S::Error>>
    where
        W: UnitOfWork<S::Tx> + ?Sized,
    {
        let mut attempt = 0;
        loop {
            if let Err(why) = ctx.check() {
                tracing::debug!(attempt = attempt + 1, reason = ?why, "transaction not attempted");
                return Err(match why {
                    Interrupted::Cancelled => TxError::Cancelled { attempt: attempt + 1 },
                    Interrupted::DeadlineExceeded => {
                        TxError::DeadlineExceeded { attempt: attempt + 1 }
                    }
                });
            }

            let mut tx = match self.store.begin().await {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::error!(error = %e, "failed to begin transaction");
                    return Err(TxError::Begin(e));
                }
            };

            let (stage, err) = match work.run(&mut tx).await {
                Ok(value) => match tx.commit().await {
                    Ok(()) => {
                        if attempt > 0 {
                            tracing::info!(attempts = attempt + 1, "transaction committed after retry");
                        }
                        return Ok(value);
                    }
                    Err(e) => {
                        self.rollback(&mut tx).await;
                        (Stage::Commit, e)
                    }
                },
                Err(WorkError::Store(e)) => {
                    self.rollback(&mut tx).await;
                    (Stage::Work, e)
                }
                Err(WorkError::NotFound(what)) => {
                    self.rollback(&mut tx).await;
                    return Err(TxError::NotFound(what));
                }
                Err(WorkError::Conflict(what)) => {
                    self.rollback(&mut tx).await;
                    return Err(TxError::Conflict(what));
                }
            };

            match (self.classify)(&err) {
                ErrorClass::Conflict => {
                    tracing::info!(
                        stage = %stage,
                        sqlstate = err.sqlstate().unwrap_or(""),
                        error = %err,
                        "transaction rejected as a conflict"
                    );
                    return Err(TxError::Duplicate { stage, source: err });
                }
                ErrorClass::Fatal => {
                    tracing::error!(
                        stage = %stage,
                        sqlstate = err.sqlstate().unwrap_or(""),
                        error = %err,
                        "transaction failed"
                    );
                    return Err(TxError::Fatal { stage, source: err });
                }
                ErrorClass::Retryable if attempt + 1 >= self.max_attempts => {
                    tracing::error!(
                        attempts = self.max_attempts,
                        sqlstate = err.sqlstate().unwrap_or(""),
                        error = %err,
                        "transaction retries exhausted"
                    );
                    return Err(TxError::Exhausted { attempts: self.max_attempts, last: err });
                }
                ErrorClass::Retryable => {
                    let delay = self.jitter.apply(self.backoff.delay_after(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        stage = %stage,
                        sqlstate = err.sqlstate().unwrap_or(""),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable transaction failure"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn rollback(&self, tx: &mut S::Tx) {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}

/// Builder for [`TransactionExecutor`].
pub struct TransactionExecutorBuilder<S: TransactionStore> {
    store: S,
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classify: Classifier<S::Error>,
    sleeper: Arc<dyn Sleeper>,
}

/// Errors produced while building an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

impl<S: TransactionStore> TransactionExecutorBuilder<S> {
    /// Three attempts, exponential backoff from 100ms, no jitter, SQLSTATE classification.
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            classify: Arc::new(|e: &S::Error| classify(e)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts, first try included. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the SQLSTATE classifier.
    pub fn classify<F>(mut self, f: F) -> Self
    where
        F: Fn(&S::Error) -> ErrorClass + Send + Sync + 'static,
    {
        self.classify = Arc::new(f);
        self
    }

    pub fn with_sleeper<T: Sleeper + 'static>(mut self, sleeper: T) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<TransactionExecutor<S>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(TransactionExecutor {
            store: self.store,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            classify: self.classify,
            sleeper: self.sleeper,
        })
    }
}
