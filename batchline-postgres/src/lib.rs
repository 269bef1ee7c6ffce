//! Postgres backend for `batchline` (companion crate).
//!
//! [`PgStore`] implements `TransactionStore` over a `sqlx` pool, and [`PgError`] exposes the
//! SQLSTATE of database errors so the executor can tell contention from real failures.
//! [`TaskStore`] and [`UserStore`] hold the repository write paths as units of work run by the
//! retrying executor. Units of work that read rows back are generic over [`DecodeRows`], so they
//! also run on the scripted store.

mod outcome;
mod rows;
mod store;
mod tasks;
mod users;

pub use rows::DecodeRows;
pub use store::{PgError, PgStore, PgTransaction};
pub use tasks::{CompleteTask, CreateTask, DeleteTask, Task, TaskStore, SCHEMA};
pub use users::{CreateUser, FindUserByEmail, User, UserStore};
