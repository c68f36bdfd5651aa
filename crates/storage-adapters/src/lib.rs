//! # storage-adapters
//!
//! Implementations of the `domains` ports.
//!
//! [`MemoryStore`] is always available and backs tests and database-less
//! runs. [`PgStore`] is compiled in with the `db-postgres` feature.

pub mod memory;
#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use memory::{MemoryStore, StoredPoint};
#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;
