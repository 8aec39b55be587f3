//! Shared SQLite persistence infrastructure.

mod open;
mod versioned_schema;

pub use open::{open_in_memory, open_or_create};
pub use versioned_schema::{Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION};
