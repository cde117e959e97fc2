//! Activity logging: JSONL append-only file, console echo and SQLite history.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
