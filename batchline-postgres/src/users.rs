//! User registration and lookup.
//!
//! Registration relies on the unique `email` column: `ON CONFLICT (email) DO NOTHING` returns no
//! row for a taken address, which surfaces as a conflict rather than a store failure.

use crate::outcome::OutcomeLog;
use crate::{DecodeRows, PgStore};
use async_trait::async_trait;
use batchline::transaction::{Statement, TransactionStore};
use batchline::{
    BatchingSink, CallContext, EventRecord, TransactionExecutor, TxError, UnitOfWork, WorkError,
};
use serde::Serialize;

const INSERT_USER: &str = "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) \
     ON CONFLICT (email) DO NOTHING RETURNING id, username, email, password_hash";
const FIND_USER_BY_EMAIL: &str =
    "SELECT id, username, email, password_hash FROM users WHERE email = $1 LIMIT 1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Stored as given; hashing happens before the repository.
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// Register a user unless the email is taken.
#[derive(Debug)]
pub struct CreateUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

#[async_trait]
impl<'a, Tx: DecodeRows> UnitOfWork<Tx> for CreateUser<'a> {
    type Output = User;

    async fn run(&self, tx: &mut Tx) -> Result<User, WorkError<Tx::Error>> {
        let statement = Statement::new(INSERT_USER)
            .bind(self.username)
            .bind(self.email)
            .bind(self.password_hash);
        let rows = tx.query(&statement).await?;
        match rows.first() {
            Some(row) => Ok(Tx::user(row)?),
            None => Err(WorkError::Conflict(format!("user with email {} already exists", self.email))),
        }
    }
}

/// Look a user up by email.
#[derive(Debug)]
pub struct FindUserByEmail<'a> {
    pub email: &'a str,
}

#[async_trait]
impl<'a, Tx: DecodeRows> UnitOfWork<Tx> for FindUserByEmail<'a> {
    type Output = User;

    async fn run(&self, tx: &mut Tx) -> Result<User, WorkError<Tx::Error>> {
        let rows = tx.query(&Statement::new(FIND_USER_BY_EMAIL).bind(self.email)).await?;
        match rows.first() {
            Some(row) => Ok(Tx::user(row)?),
            None => Err(WorkError::NotFound(format!("user with email {}", self.email))),
        }
    }
}

/// User repository. Outcome records carry the user id once it is known.
#[derive(Debug)]
pub struct UserStore<S: TransactionStore = PgStore> {
    executor: TransactionExecutor<S>,
    outcomes: OutcomeLog,
}

impl<S> UserStore<S>
where
    S: TransactionStore,
    S::Tx: DecodeRows,
{
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

    pub fn log(&self) -> &BatchingSink<EventRecord> {
        self.outcomes.sink()
    }

    /// A taken email is [`TxError::is_conflict`].
    pub async fn create_user(
        &self,
        ctx: &CallContext,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, TxError<S::Error>> {
        let work = CreateUser { username, email, password_hash };
        let result = self.executor.execute(ctx, &work).await;
        let subject = result.as_ref().ok().map(|user| user.id);
        self.outcomes.report(subject, "create_user", &result, |user| {
            format!("user {} created", user.id)
        });
        result
    }

    /// An unknown email is [`TxError::is_not_found`].
    pub async fn find_user_by_email(
        &self,
        ctx: &CallContext,
        email: &str,
    ) -> Result<User, TxError<S::Error>> {
        let result = self.executor.execute(ctx, &FindUserByEmail { email }).await;
        let subject = result.as_ref().ok().map(|user| user.id);
        self.outcomes.report(subject, "find_user", &result, |user| format!("user {} found", user.id));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline::transaction::{Op, ScriptedError, ScriptedStore, ScriptedTx, StoreError, Value};
    use batchline::{InstantSleeper, MemoryWriter, SinkConfig};
    use std::time::Duration;

    fn store(scripted: &ScriptedStore, writer: &MemoryWriter) -> UserStore<ScriptedStore> {
        let executor = TransactionExecutor::builder(scripted.clone())
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        let log = BatchingSink::spawn(SinkConfig::new(10, Duration::from_secs(60)), writer.clone())
            .unwrap();
        UserStore::new(executor, log).with_service("db-service")
    }

    fn logged(writer: &MemoryWriter) -> Vec<serde_json::Value> {
        writer.payloads().iter().map(|p| serde_json::from_slice(p).unwrap()).collect()
    }

    fn user_row(id: i64, email: &str) -> Vec<Value> {
        vec![Value::Int(id), Value::from("ada"), Value::from(email), Value::from("$argon2id$x")]
    }

    #[tokio::test]
    async fn create_user_returns_the_new_row() {
        let scripted = ScriptedStore::new();
        scripted.push_query(Ok(vec![user_row(8, "ada@example.com")]));
        let writer = MemoryWriter::new();
        let users = store(&scripted, &writer);

        let user = users
            .create_user(&CallContext::new(), "ada", "ada@example.com", "$argon2id$x")
            .await
            .unwrap();
        users.log().close().await;

        assert_eq!(user.id, 8);
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(scripted.journal(), vec![Op::Begin, Op::Query(INSERT_USER.to_string()), Op::Commit]);
        let records = logged(&writer);
        assert_eq!(records[0]["level"], "INFO");
        assert_eq!(records[0]["user_id"], 8);
        assert_eq!(records[0]["detail"], "user 8 created");
    }

    #[tokio::test]
    async fn taken_email_is_a_conflict_without_retry() {
        let scripted = ScriptedStore::new();
        // ON CONFLICT DO NOTHING returns no row
        let writer = MemoryWriter::new();
        let users = store(&scripted, &writer);

        let err = users
            .create_user(&CallContext::new(), "ada", "ada@example.com", "h")
            .await
            .unwrap_err();
        users.log().close().await;

        assert!(err.is_conflict());
        assert!(matches!(err, TxError::Conflict(_)));
        assert!(err.to_string().contains("ada@example.com already exists"));
        assert_eq!(scripted.begins(), 1);
        assert_eq!(scripted.rollbacks(), 1);
        let records = logged(&writer);
        assert_eq!(records[0]["level"], "ERROR");
        assert!(records[0].get("user_id").is_none());
    }

    #[tokio::test]
    async fn unique_violation_from_the_store_is_a_conflict() {
        let scripted = ScriptedStore::new();
        scripted.push_query(Err(ScriptedError::unique_violation()));
        let writer = MemoryWriter::new();
        let users = store(&scripted, &writer);

        let err = users.create_user(&CallContext::new(), "ada", "a@b.c", "h").await.unwrap_err();
        users.log().close().await;

        assert!(err.is_conflict());
        assert_eq!(err.store_error().and_then(|e| e.sqlstate()), Some("23505"));
        assert_eq!(scripted.begins(), 1);
    }

    #[tokio::test]
    async fn lookup_finds_by_email() {
        let scripted = ScriptedStore::new();
        scripted.push_query(Ok(vec![user_row(3, "grace@example.com")]));
        let writer = MemoryWriter::new();
        let users = store(&scripted, &writer);

        let user = users.find_user_by_email(&CallContext::new(), "grace@example.com").await.unwrap();
        users.log().close().await;

        assert_eq!(user.id, 3);
        assert_eq!(user.password_hash, "$argon2id$x");
        let records = logged(&writer);
        assert_eq!(records[0]["event"], "find_user");
        assert_eq!(records[0]["user_id"], 3);
    }

    #[tokio::test]
    async fn unknown_email_is_not_found_and_logged_as_info() {
        let scripted = ScriptedStore::new();
        let writer = MemoryWriter::new();
        let users = store(&scripted, &writer);

        let err = users.find_user_by_email(&CallContext::new(), "nobody@example.com").await.unwrap_err();
        users.log().close().await;

        assert!(err.is_not_found());
        assert_eq!(scripted.begins(), 1);
        assert_eq!(logged(&writer)[0]["level"], "INFO");
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = ScriptedTx::user(&user_row(1, "a@b.c")).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "a@b.c");
    }
}
