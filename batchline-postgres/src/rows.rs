//! Decoding of returned rows into repository types.
//!
//! Units of work that read rows back (`INSERT .. RETURNING`, lookups) are generic over
//! [`DecodeRows`], so they run against Postgres and against the scripted store alike. Scripted
//! rows are positional and list their columns in the order the SQL selects them.

use crate::{PgError, PgTransaction, Task, User};
use batchline::transaction::{ScriptedError, ScriptedTx, Transaction, Value};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

/// A transaction whose rows decode into [`Task`] and [`User`].
pub trait DecodeRows: Transaction {
    fn task(row: &Self::Row) -> Result<Task, Self::Error>;

    fn user(row: &Self::Row) -> Result<User, Self::Error>;

    /// Error for a statement that must return a row but returned none.
    fn missing_row(statement: &'static str) -> Self::Error;
}

impl DecodeRows for PgTransaction {
    fn task(row: &PgRow) -> Result<Task, PgError> {
        Ok(Task {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn user(row: &PgRow) -> Result<User, PgError> {
        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
        })
    }

    fn missing_row(statement: &'static str) -> PgError {
        PgError::MissingRow(statement)
    }
}

/// Columns: `id, user_id, title, description, status, created_at` (RFC 3339 text).
/// Users: `id, username, email, password_hash`.
impl DecodeRows for ScriptedTx {
    fn task(row: &Vec<Value>) -> Result<Task, ScriptedError> {
        Ok(Task {
            id: int(row, 0)?,
            user_id: int(row, 1)?,
            title: text(row, 2)?.to_string(),
            description: text(row, 3)?.to_string(),
            status: boolean(row, 4)?,
            created_at: timestamp(row, 5)?,
        })
    }

    fn user(row: &Vec<Value>) -> Result<User, ScriptedError> {
        Ok(User {
            id: int(row, 0)?,
            username: text(row, 1)?.to_string(),
            email: text(row, 2)?.to_string(),
            password_hash: text(row, 3)?.to_string(),
        })
    }

    fn missing_row(statement: &'static str) -> ScriptedError {
        ScriptedError::new(format!("{statement} returned no row"))
    }
}

fn column(row: &[Value], index: usize) -> Result<&Value, ScriptedError> {
    row.get(index).ok_or_else(|| ScriptedError::new(format!("no column {index}")))
}

fn mismatch(index: usize, expected: &str, found: &Value) -> ScriptedError {
    ScriptedError::new(format!("column {index}: expected {expected}, found {found:?}"))
}

fn int(row: &[Value], index: usize) -> Result<i64, ScriptedError> {
    match column(row, index)? {
        Value::Int(v) => Ok(*v),
        other => Err(mismatch(index, "integer", other)),
    }
}

fn text(row: &[Value], index: usize) -> Result<&str, ScriptedError> {
    match column(row, index)? {
        Value::Text(v) => Ok(v),
        other => Err(mismatch(index, "text", other)),
    }
}

fn boolean(row: &[Value], index: usize) -> Result<bool, ScriptedError> {
    match column(row, index)? {
        Value::Bool(v) => Ok(*v),
        other => Err(mismatch(index, "boolean", other)),
    }
}

fn timestamp(row: &[Value], index: usize) -> Result<DateTime<Utc>, ScriptedError> {
    let raw = text(row, index)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ScriptedError::new(format!("column {index}: {e}")))
}
