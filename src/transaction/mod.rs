//! Transactional execution with bounded retry.
//!
//! A [`UnitOfWork`] runs against one open [`Transaction`]. The [`TransactionExecutor`] begins
//! the transaction, runs the work, commits, and retries the whole attempt when the store reports
//! transient contention (serialization failure, deadlock, lock not available).
//!
//! Domain outcomes are kept apart from store failures: a unit of work reports a missing row as
//! [`WorkError::NotFound`] (see [`expect_affected`]) and the executor returns it as
//! [`TxError::NotFound`] without retrying.

mod classify;
mod context;
mod executor;
mod scripted;
mod store;

pub use crate::error::{Stage, TxError, WorkError};
pub use classify::{classify, classify_sqlstate, sqlstate, ErrorClass};
pub use context::{CallContext, Interrupted};
pub use executor::{BuildError, TransactionExecutor, TransactionExecutorBuilder};
pub use scripted::{Op, ScriptedError, ScriptedStore, ScriptedTx};
pub use store::{Statement, StoreError, Transaction, TransactionStore, Value};

use async_trait::async_trait;

/// The operation run inside each transaction attempt.
///
/// The executor may call `run` more than once, each time on a fresh transaction, so it must not
/// carry side effects outside the transaction.
#[async_trait]
pub trait UnitOfWork<Tx: Transaction>: Send + Sync {
    type Output: Send;

    async fn run(&self, tx: &mut Tx) -> Result<Self::Output, WorkError<Tx::Error>>;
}

/// Turn a zero affected-row count into [`WorkError::NotFound`].
///
/// As the tail of a unit of work the error type is inferred:
/// `expect_affected(rows, format!("task {id}")).map(|_| ())`. Elsewhere name it:
/// `expect_affected::<PgError>(rows, "task")?`.
pub fn expect_affected<E>(rows: u64, what: impl Into<String>) -> Result<u64, WorkError<E>> {
    if rows == 0 {
        Err(WorkError::NotFound(what.into()))
    } else {
        Ok(rows)
    }
}
