//! An in-memory [`TransactionStore`] whose failures are scripted ahead of time.
//!
//! Useful for exercising units of work and retry behaviour without a database. Every call is
//! journaled so tests can assert on the exact begin/execute/commit/rollback sequence.

use super::{Statement, StoreError, Transaction, TransactionStore, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// A store error with an optional SQLSTATE.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptedError {
    code: Option<String>,
    message: String,
}

impl ScriptedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into() }
    }

    pub fn with_sqlstate(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: Some(code.into()), message: message.into() }
    }

    pub fn serialization_failure() -> Self {
        Self::with_sqlstate("40001", "could not serialize access due to concurrent update")
    }

    pub fn deadlock() -> Self {
        Self::with_sqlstate("40P01", "deadlock detected")
    }

    pub fn lock_not_available() -> Self {
        Self::with_sqlstate("55P03", "could not obtain lock on row")
    }

    pub fn unique_violation() -> Self {
        Self::with_sqlstate("23505", "duplicate key value violates unique constraint")
    }
}

impl StoreError for ScriptedError {
    fn sqlstate(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// One journaled store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Begin,
    Execute(String),
    Query(String),
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct Script {
    begin: VecDeque<ScriptedError>,
    execute: VecDeque<Result<u64, ScriptedError>>,
    query: VecDeque<Result<Vec<Vec<Value>>, ScriptedError>>,
    commit: VecDeque<ScriptedError>,
    journal: Vec<Op>,
}

/// Scripted store. Unscripted executes affect one row, unscripted queries return no rows and
/// unscripted begins and commits succeed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStore {
    script: Arc<Mutex<Script>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `begin`.
    pub fn fail_begin(&self, err: ScriptedError) -> &Self {
        self.lock().begin.push_back(err);
        self
    }

    /// Queue the result of the next unscripted `execute`.
    pub fn push_execute(&self, result: Result<u64, ScriptedError>) -> &Self {
        self.lock().execute.push_back(result);
        self
    }

    pub fn push_query(&self, result: Result<Vec<Vec<Value>>, ScriptedError>) -> &Self {
        self.lock().query.push_back(result);
        self
    }

    /// Fail the next `commit`.
    pub fn fail_commit(&self, err: ScriptedError) -> &Self {
        self.lock().commit.push_back(err);
        self
    }

    pub fn journal(&self) -> Vec<Op> {
        self.lock().journal.clone()
    }

    pub fn begins(&self) -> usize {
        self.count(|op| matches!(op, Op::Begin))
    }

    pub fn commits(&self) -> usize {
        self.count(|op| matches!(op, Op::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|op| matches!(op, Op::Rollback))
    }

    /// SQL text of every executed statement, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|op| match op {
                Op::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.lock().journal.iter().filter(|op| pred(op)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TransactionStore for ScriptedStore {
    type Error = ScriptedError;
    type Tx = ScriptedTx;

    async fn begin(&self) -> Result<ScriptedTx, ScriptedError> {
        let mut script = self.lock();
        script.journal.push(Op::Begin);
        match script.begin.pop_front() {
            Some(err) => Err(err),
            None => Ok(ScriptedTx { script: Arc::clone(&self.script), open: true }),
        }
    }
}

/// Transaction handed out by [`ScriptedStore`]. Commit and rollback both end it.
#[derive(Debug)]
pub struct ScriptedTx {
    script: Arc<Mutex<Script>>,
    open: bool,
}

impl ScriptedTx {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transaction for ScriptedTx {
    type Row = Vec<Value>;
    type Error = ScriptedError;

    async fn execute(&mut self, statement: &Statement) -> Result<u64, ScriptedError> {
        let mut script = self.lock();
        script.journal.push(Op::Execute(statement.sql().to_string()));
        script.execute.pop_front().unwrap_or(Ok(1))
    }

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Vec<Value>>, ScriptedError> {
        let mut script = self.lock();
        script.journal.push(Op::Query(statement.sql().to_string()));
        script.query.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn commit(&mut self) -> Result<(), ScriptedError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut script = self.lock();
        script.journal.push(Op::Commit);
        match script.commit.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), ScriptedError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.lock().journal.push(Op::Rollback);
        Ok(())
    }
}
