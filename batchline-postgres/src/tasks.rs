//! Task storage write paths.
//!
//! Every write runs as a unit of work under the retrying executor and reports its outcome as an
//! [`EventRecord`] on the log sink, keyed by the acting user.

use crate::outcome::OutcomeLog;
use crate::{DecodeRows, PgError, PgStore, PgTransaction};
use async_trait::async_trait;
use batchline::transaction::{Statement, Transaction, TransactionStore};
use batchline::{
    expect_affected, BatchingSink, CallContext, EventRecord, TransactionExecutor, TxError,
    UnitOfWork, WorkError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// DDL for the `tasks` and `users` tables the queries expect. Run it with `sqlx::raw_sql`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status      BOOLEAN NOT NULL DEFAULT FALSE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS users (
    id            BIGSERIAL PRIMARY KEY,
    username      TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL
);
"#;

const INSERT_TASK: &str = "INSERT INTO tasks (user_id, title, description) VALUES ($1, $2, $3) \
     RETURNING id, user_id, title, description, status, created_at";
const COMPLETE_TASK: &str = "UPDATE tasks SET status = true WHERE user_id = $1 AND id = $2";
const DELETE_TASK: &str = "DELETE FROM tasks WHERE user_id = $1 AND id = $2";
const LIST_TASKS: &str = "SELECT id, user_id, title, description, status, created_at \
     FROM tasks WHERE user_id = $1 ORDER BY id ASC LIMIT $2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub status: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert a task and return the stored row.
#[derive(Debug)]
pub struct CreateTask<'a> {
    pub user_id: i64,
    pub title: &'a str,
    pub description: &'a str,
}

#[async_trait]
impl<'a, Tx: DecodeRows> UnitOfWork<Tx> for CreateTask<'a> {
    type Output = Task;

    async fn run(&self, tx: &mut Tx) -> Result<Task, WorkError<Tx::Error>> {
        let statement = Statement::new(INSERT_TASK)
            .bind(self.user_id)
            .bind(self.title)
            .bind(self.description);
        let rows = tx.query(&statement).await?;
        // the returned row is the success path
        let row = rows.first().ok_or_else(|| Tx::missing_row("INSERT INTO tasks"))?;
        Ok(Tx::task(row)?)
    }
}

/// Mark a user's task done. Works on any transaction type.
#[derive(Debug, Clone, Copy)]
pub struct CompleteTask {
    pub user_id: i64,
    pub task_id: i64,
}

#[async_trait]
impl<Tx: Transaction> UnitOfWork<Tx> for CompleteTask {
    type Output = ();

    async fn run(&self, tx: &mut Tx) -> Result<(), WorkError<Tx::Error>> {
        let statement = Statement::new(COMPLETE_TASK).bind(self.user_id).bind(self.task_id);
        let rows = tx.execute(&statement).await?;
        expect_affected(rows, format!("task {}", self.task_id)).map(|_| ())
    }
}

/// Delete a user's task. Works on any transaction type.
#[derive(Debug, Clone, Copy)]
pub struct DeleteTask {
    pub user_id: i64,
    pub task_id: i64,
}

#[async_trait]
impl<Tx: Transaction> UnitOfWork<Tx> for DeleteTask {
    type Output = ();

    async fn run(&self, tx: &mut Tx) -> Result<(), WorkError<Tx::Error>> {
        let statement = Statement::new(DELETE_TASK).bind(self.user_id).bind(self.task_id);
        let rows = tx.execute(&statement).await?;
        expect_affected(rows, format!("task {}", self.task_id)).map(|_| ())
    }
}

/// Task repository: retrying writes plus an outcome record per call.
#[derive(Debug)]
pub struct TaskStore<S: TransactionStore = PgStore> {
    executor: TransactionExecutor<S>,
    outcomes: OutcomeLog,
}

impl<S: TransactionStore> TaskStore<S> {
    pub fn new(executor: TransactionExecutor<S>, log: BatchingSink<EventRecord>) -> Self {
        Self { executor, outcomes: OutcomeLog::new(log) }
    }

    /// Service name stamped on emitted records.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.outcomes.set_service(service.into());
        self
    }

    pub fn executor(&self) -> &TransactionExecutor<S> {
        &self.executor
    }

    /// The sink outcome records go to; close it on shutdown.
    pub fn log(&self) -> &BatchingSink<EventRecord> {
        self.outcomes.sink()
    }

    pub async fn create_task(
        &self,
        ctx: &CallContext,
        user_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Task, TxError<S::Error>>
    where
        S::Tx: DecodeRows,
    {
        let work = CreateTask { user_id, title, description };
        let result = self.executor.execute(ctx, &work).await;
        self.outcomes.report(Some(user_id), "create_task", &result, |task| {
            format!("task {} created", task.id)
        });
        result
    }

    pub async fn complete_task(
        &self,
        ctx: &CallContext,
        user_id: i64,
        task_id: i64,
    ) -> Result<(), TxError<S::Error>> {
        let result = self.executor.execute(ctx, &CompleteTask { user_id, task_id }).await;
        self.outcomes.report(Some(user_id), "complete_task", &result, |_| {
            format!("task {task_id} completed")
        });
        result
    }

    pub async fn delete_task(
        &self,
        ctx: &CallContext,
        user_id: i64,
        task_id: i64,
    ) -> Result<(), TxError<S::Error>> {
        let result = self.executor.execute(ctx, &DeleteTask { user_id, task_id }).await;
        self.outcomes.report(Some(user_id), "delete_task", &result, |_| {
            format!("task {task_id} deleted")
        });
        result
    }
}

impl TaskStore<PgStore> {
    /// First `limit` tasks of a user, oldest first. Reads run outside the retry loop.
    pub async fn list_tasks(&self, user_id: i64, limit: i64) -> Result<Vec<Task>, PgError> {
        let rows = sqlx::query(LIST_TASKS)
            .bind(user_id)
            .bind(limit)
            .fetch_all(self.executor.store().pool())
            .await;
        let tasks = rows
            .map_err(PgError::from)
            .and_then(|rows| rows.iter().map(PgTransaction::task).collect::<Result<Vec<_>, _>>());
        if let Err(e) = &tasks {
            self.outcomes
                .emit(EventRecord::error("storage", "list_tasks", e.to_string()), Some(user_id));
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline::transaction::{ScriptedError, ScriptedStore, Value};
    use batchline::{InstantSleeper, MemoryWriter, SinkConfig};
    use std::time::Duration;

    fn store(scripted: &ScriptedStore, writer: &MemoryWriter) -> TaskStore<ScriptedStore> {
        let executor = TransactionExecutor::builder(scripted.clone())
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        let log = BatchingSink::spawn(SinkConfig::new(10, Duration::from_secs(60)), writer.clone())
            .unwrap();
        TaskStore::new(executor, log).with_service("db-service")
    }

    fn logged(writer: &MemoryWriter) -> Vec<serde_json::Value> {
        writer.payloads().iter().map(|p| serde_json::from_slice(p).unwrap()).collect()
    }

    #[tokio::test]
    async fn complete_task_logs_success_for_the_user() {
        let scripted = ScriptedStore::new();
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        tasks.complete_task(&CallContext::new(), 5, 11).await.unwrap();
        tasks.log().close().await;

        assert_eq!(scripted.executed(), vec![COMPLETE_TASK.to_string()]);
        let records = logged(&writer);
        assert_eq!(records[0]["level"], "INFO");
        assert_eq!(records[0]["user_id"], 5);
        assert_eq!(records[0]["service"], "db-service");
        assert_eq!(records[0]["detail"], "task 11 completed");
    }

    #[tokio::test]
    async fn delete_of_missing_task_is_not_found() {
        let scripted = ScriptedStore::new();
        scripted.push_execute(Ok(0));
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        let err = tasks.delete_task(&CallContext::new(), 5, 99).await.unwrap_err();
        tasks.log().close().await;

        assert!(err.is_not_found());
        assert_eq!(scripted.begins(), 1);
        assert_eq!(logged(&writer)[0]["level"], "INFO");
    }

    #[tokio::test]
    async fn contention_is_retried_and_failure_logged_as_error() {
        let scripted = ScriptedStore::new();
        for _ in 0..3 {
            scripted.push_execute(Err(ScriptedError::serialization_failure()));
        }
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        let err = tasks.complete_task(&CallContext::new(), 2, 3).await.unwrap_err();
        tasks.log().close().await;

        assert!(err.is_retry_exhausted());
        assert_eq!(scripted.begins(), 3);
        let records = logged(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "ERROR");
    }

    fn task_row(id: i64, user_id: i64, title: &str) -> Vec<Value> {
        vec![
            Value::Int(id),
            Value::Int(user_id),
            Value::from(title),
            Value::from(""),
            Value::Bool(false),
            Value::from("2024-05-01T12:00:00Z"),
        ]
    }

    #[tokio::test]
    async fn create_task_returns_the_inserted_row() {
        let scripted = ScriptedStore::new();
        scripted.push_query(Ok(vec![task_row(17, 5, "write report")]));
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        let task = tasks.create_task(&CallContext::new(), 5, "write report", "").await.unwrap();
        tasks.log().close().await;

        assert_eq!(task.id, 17);
        assert_eq!(task.user_id, 5);
        assert_eq!(task.title, "write report");
        assert_eq!(scripted.commits(), 1);
        let records = logged(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "INFO");
        assert_eq!(records[0]["event"], "create_task");
        assert_eq!(records[0]["detail"], "task 17 created");
        assert_eq!(records[0]["user_id"], 5);
    }

    #[tokio::test]
    async fn create_task_without_returned_row_fails_once() {
        let scripted = ScriptedStore::new();
        // unscripted queries return no rows
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        let err = tasks.create_task(&CallContext::new(), 5, "lost", "").await.unwrap_err();
        tasks.log().close().await;

        assert!(err.is_fatal());
        assert!(err.to_string().contains("INSERT INTO tasks returned no row"));
        assert_eq!(scripted.begins(), 1);
        assert_eq!(scripted.commits(), 0);
        assert_eq!(scripted.rollbacks(), 1);
        let records = logged(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "ERROR");
        assert_eq!(records[0]["user_id"], 5);
    }

    #[tokio::test]
    async fn create_task_retries_serialization_failures() {
        let scripted = ScriptedStore::new();
        scripted.push_query(Err(ScriptedError::serialization_failure()));
        scripted.push_query(Ok(vec![task_row(2, 9, "retry me")]));
        let writer = MemoryWriter::new();
        let tasks = store(&scripted, &writer);

        let task = tasks.create_task(&CallContext::new(), 9, "retry me", "").await.unwrap();
        tasks.log().close().await;

        assert_eq!(task.id, 2);
        assert_eq!(scripted.begins(), 2);
        assert_eq!(logged(&writer)[0]["level"], "INFO");
    }
}
