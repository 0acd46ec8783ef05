//! Database module for PostgreSQL execution
//!
//! Runs accepted SQL and intent templates over a read-only transaction and
//! shapes rows into JSON.

pub mod connection;
pub mod executor;
pub mod rows;

pub use connection::{init_pool, DbPool};
pub use executor::{PgExecutor, QueryExecutor};
pub use rows::QueryRows;
