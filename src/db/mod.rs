pub mod migrations;
pub mod models;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

/// Shared database handle. rusqlite is synchronous, so every store call
/// takes the lock inside `tokio::task::spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) `data_dir/chatwire.db` in WAL mode and bring the schema
/// up to date.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = Path::new(data_dir).join("chatwire.db");

    let mut conn = Connection::open(&db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    prepare(&mut conn)?;

    tracing::info!(path = %db_path.display(), "Database initialized");
    Ok(Arc::new(Mutex::new(conn)))
}

/// Private in-memory database with the full schema, for unit tests.
pub fn init_memory_db() -> Result<DbPool, Box<dyn std::error::Error>> {
    let mut conn = Connection::open_in_memory()?;
    prepare(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn prepare(conn: &mut Connection) -> Result<(), Box<dyn std::error::Error>> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(conn)?;
    Ok(())
}

/// Current time as an RFC 3339 UTC timestamp with microseconds.
/// Fixed width, so lexical order in SQL matches chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
