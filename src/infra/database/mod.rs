//! Postgres-backed pending store.

pub mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
