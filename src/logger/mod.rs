//! Activity logging: JSONL append-only log plus optional SQLite history.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
