//! Alphadesk Persistence
//!
//! SQLite run history plus JSON weight artifacts on disk.

mod artifacts;
mod database;
mod repositories;

pub use artifacts::ArtifactStore;
pub use database::Database;
pub use repositories::*;

pub use alphadesk_core::PersistenceError;

pub type Result<T> = std::result::Result<T, PersistenceError>;

pub(crate) fn db_err(e: sqlx::Error) -> PersistenceError {
    PersistenceError::DatabaseError(e.to_string())
}
