use rusqlite::{Connection, Result};
use std::path::Path;

pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let sql = include_str!("../migrations/0001_init.sql");
    conn.execute_batch(sql)?;
    Ok(())
}

pub fn open_and_migrate(path: &Path) -> Result<Connection> {
    let conn = open(path)?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn with_test_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrate(&conn)?;
    Ok(conn)
}
