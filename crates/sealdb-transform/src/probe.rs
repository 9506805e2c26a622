//! Cheap checks of a database file's encryption state.

use std::path::Path;

use rusqlite::{Connection, ErrorCode, OpenFlags};
use secrecy::{ExposeSecret, SecretString};

const SCHEMA_PROBE: &str = "SELECT count(*) FROM sqlite_master";

fn is_not_a_database(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::NotADatabase)
}

/// Read the schema without a key. `true` means the file is plain SQLite.
pub fn is_plaintext(path: &Path) -> Result<bool, rusqlite::Error> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    match conn.query_row(SCHEMA_PROBE, [], |row| row.get::<_, i64>(0)) {
        Ok(_) => Ok(true),
        Err(e) if is_not_a_database(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Apply `key` and read the schema. `false` means the key does not open it.
pub fn key_opens(path: &Path, key: &SecretString) -> Result<bool, rusqlite::Error> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    apply_key(&conn, key)?;
    match conn.query_row(SCHEMA_PROBE, [], |row| row.get::<_, i64>(0)) {
        Ok(_) => Ok(true),
        Err(e) if is_not_a_database(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// `PRAGMA key` with the key passed as a bound value.
pub fn apply_key(conn: &Connection, key: &SecretString) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "key", key.expose_secret())
}
