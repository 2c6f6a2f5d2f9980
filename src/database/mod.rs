//! Postgres connection pool and schema migrations

pub mod migrations;
pub mod pool;

pub use pool::Database;
