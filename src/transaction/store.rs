//! The transactional store capability the executor drives.

use async_trait::async_trait;
use std::borrow::Cow;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// SQL text plus positional parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: Cow<'static, str>,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Errors produced by a store. The SQLSTATE code drives retry classification.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
    fn sqlstate(&self) -> Option<&str> {
        None
    }
}

/// One open transaction.
#[async_trait]
pub trait Transaction: Send {
    type Row: Send;
    type Error: StoreError;

    /// Run a statement and return the number of rows it affected.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, Self::Error>;

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Self::Row>, Self::Error>;

    async fn commit(&mut self) -> Result<(), Self::Error>;

    async fn rollback(&mut self) -> Result<(), Self::Error>;
}

/// Something that can open transactions, usually a connection pool.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    type Error: StoreError;
    type Tx: Transaction<Error = Self::Error>;

    async fn begin(&self) -> Result<Self::Tx, Self::Error>;
}
