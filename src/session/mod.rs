//! # Database Sessions
//!
//! Everything that talks to a database goes through the [`Session`] trait.
//! `PgSession` speaks to PostgreSQL; `MemoryDatabase` simulates the subset
//! of PostgreSQL behaviour the tool depends on and backs the tests.

mod backend;
mod errors;
mod memory;
mod postgres;
mod provisioner;

pub use backend::{Session, TxControl};
pub use errors::{SessionError, SessionResult};
pub use memory::{builtin_type, Effect, MemoryCluster, MemoryDatabase};
pub use postgres::PgSession;
pub use provisioner::{database_url, Connector, PgConnector, PgProvisioner, Provisioner};
