//! Opening and version-checking SQLite databases.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use super::versioned_schema::{VersionedSchema, BASE_DB_VERSION};

/// Open an existing database or create a new one with the latest schema.
///
/// Existing databases are version-checked against `schemas` and validated
/// table by table; pending migrations are applied.
pub fn open_or_create<P: AsRef<Path>>(
    db_path: P,
    schemas: &'static [VersionedSchema],
) -> Result<Connection> {
    let conn = if db_path.as_ref().exists() {
        Connection::open_with_flags(
            &db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?
    } else {
        let conn = Connection::open(&db_path)?;
        schemas
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        info!("Created new database at {:?}", db_path.as_ref());
        conn
    };

    let db_version = conn
        .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
        .context("Failed to read database version")?
        - BASE_DB_VERSION as i64;

    if db_version < 0 {
        bail!(
            "Database {:?} does not carry base version {}",
            db_path.as_ref(),
            BASE_DB_VERSION
        );
    }
    let version = db_version as usize;

    if version >= schemas.len() {
        bail!(
            "Database version {} is too new (max supported: {})",
            version,
            schemas.len() - 1
        );
    }

    schemas
        .get(version)
        .context("Failed to get schema")?
        .validate(&conn)?;

    migrate_if_needed(&conn, version, schemas)?;

    Ok(conn)
}

/// Create an in-memory database with the latest schema, for tests.
pub fn open_in_memory(schemas: &'static [VersionedSchema]) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schemas
        .last()
        .context("No schemas defined")?
        .create(&conn)?;
    Ok(conn)
}

fn migrate_if_needed(
    conn: &Connection,
    current_version: usize,
    schemas: &'static [VersionedSchema],
) -> Result<()> {
    let target_version = schemas.len() - 1;
    if current_version >= target_version {
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, target_version
    );

    for schema in schemas.iter().skip(current_version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!("Running migration to version {}", schema.version);
            migration_fn(conn)?;
        }
    }

    conn.execute(
        &format!(
            "PRAGMA user_version = {}",
            BASE_DB_VERSION + target_version
        ),
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::{Column, SqlType, Table};
    use tempfile::TempDir;

    const TEST_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[Table {
            name: "items",
            columns: &[Column {
                name: "id",
                sql_type: &SqlType::Text,
                is_primary_key: true,
                non_null: false,
                is_unique: false,
                default_value: None,
            }],
            indices: &[],
        }],
        migration: None,
    }];

    #[test]
    fn test_open_creates_and_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let conn = open_or_create(&db_path, TEST_SCHEMAS).unwrap();
        drop(conn);

        // Second open must validate against the existing file
        open_or_create(&db_path, TEST_SCHEMAS).unwrap();
    }

    #[test]
    fn test_open_rejects_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("foreign.db");

        let conn = Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE items (id TEXT PRIMARY KEY)", [])
            .unwrap();
        drop(conn);

        let result = open_or_create(&db_path, TEST_SCHEMAS);
        assert!(result.is_err());
    }
}
