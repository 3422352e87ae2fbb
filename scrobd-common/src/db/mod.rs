//! Database access for scrobd
//!
//! SQLite via sqlx with runtime-bound queries. Schema creation is idempotent
//! and runs at startup; one module per table family.

pub mod imports;
pub mod init;
pub mod media;
pub mod records;
pub mod settings;
pub mod users;

pub use init::init_database;
