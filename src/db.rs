use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Ordered schema migrations. Each id is applied at most once.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0000_books",
        "CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            author TEXT,
            isbn TEXT,
            location TEXT,
            notes TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'available' CHECK (status IN ('available', 'lent')),
            lent_to TEXT,
            lend_date INTEGER,
            due_date INTEGER,
            cover_url TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    ),
    (
        "0001_books_location_status",
        "CREATE INDEX IF NOT EXISTS idx_books_location ON books(location);
         CREATE INDEX IF NOT EXISTS idx_books_status ON books(status);",
    ),
];

/// Opens (creating if needed) the catalog database at `path` and brings the
/// schema up to date.
pub fn init_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    migrate(&conn)?;
    log::info!("catalog database ready at {}", path.display());
    Ok(conn)
}

pub fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;
    for (id, sql) in MIGRATIONS {
        apply_migration(conn, id, sql)?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, id: &str, sql: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM schema_migrations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }
    conn.execute_batch(sql)?;
    conn.execute(
        "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
        params![id, chrono::Utc::now().timestamp_millis()],
    )?;
    log::info!("applied migration {}", id);
    Ok(())
}
