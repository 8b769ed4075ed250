//! Data source connectors
//!
//! - [`PostgresConnector`]: PostgreSQL over `tokio-postgres`
//! - [`MemoryConnector`]: seeded in-memory tables

mod memory;
mod postgres;

pub use memory::{MemoryConnector, MemorySession};
pub use postgres::{PostgresConnector, PostgresSession};
