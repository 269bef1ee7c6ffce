use async_trait::async_trait;
use batchline::transaction::{Statement, StoreError, Transaction, TransactionStore, Value};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgDatabaseError, PgPoolOptions, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{Encode, PgPool, Postgres, Type};

/// Errors from the Postgres store.
///
/// | Source | `sqlstate()` |
/// |--------|--------------|
/// | database error | the server's SQLSTATE, e.g. `40001` |
/// | pool, I/O, decode errors | `None` (classified fatal) |
/// | use after commit/rollback | `None` |
#[derive(Debug, thiserror::Error)]
pub enum PgError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("transaction already finished")]
    Finished,
    #[error("{0} returned no row")]
    MissingRow(&'static str),
}

impl StoreError for PgError {
    fn sqlstate(&self) -> Option<&str> {
        match self {
            PgError::Sqlx(sqlx::Error::Database(db_err)) => {
                db_err.try_downcast_ref::<PgDatabaseError>().map(PgDatabaseError::code)
            }
            _ => None,
        }
    }
}

/// Connection pool that hands out transactions.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, PgError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    type Error = PgError;
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, PgError> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { inner: Some(tx) })
    }
}

/// An open Postgres transaction. Commit and rollback consume the inner transaction; later calls
/// are no-ops. Dropping it unfinished rolls back.
pub struct PgTransaction {
    inner: Option<sqlx::Transaction<'static, Postgres>>,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction").field("open", &self.inner.is_some()).finish()
    }
}

impl PgTransaction {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, PgError> {
        self.inner.as_mut().ok_or(PgError::Finished)
    }
}

/// A NULL sent with the unspecified type OID, so the server infers the column type.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(UntypedNull),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

#[async_trait]
impl Transaction for PgTransaction {
    type Row = PgRow;
    type Error = PgError;

    async fn execute(&mut self, statement: &Statement) -> Result<u64, PgError> {
        let tx = self.open()?;
        let query = bind_params(sqlx::query(statement.sql()), statement.params());
        let done = query.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }

    async fn query(&mut self, statement: &Statement) -> Result<Vec<PgRow>, PgError> {
        let tx = self.open()?;
        let query = bind_params(sqlx::query(statement.sql()), statement.params());
        Ok(query.fetch_all(&mut **tx).await?)
    }

    async fn commit(&mut self) -> Result<(), PgError> {
        match self.inner.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), PgError> {
        match self.inner.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }
}
