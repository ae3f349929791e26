use crate::error::IntakeError;
use crate::logging::log_info;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One SQLite connection shared by the parcel and credential stores
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (creating if needed) the database file
pub fn open(db_path: &Path) -> Result<SharedConnection, IntakeError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    log_info(
        "database",
        &format!("Database connection established at {:?}", db_path),
    )
    .unwrap_or_default();

    Ok(Arc::new(Mutex::new(conn)))
}

pub fn open_in_memory() -> Result<SharedConnection, IntakeError> {
    Ok(Arc::new(Mutex::new(Connection::open_in_memory()?)))
}

/// Lock the shared connection, mapping a poisoned lock to an error
pub fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, IntakeError> {
    conn.lock()
        .map_err(|_| IntakeError::LockPoisoned("database connection".to_string()))
}

/// Current time truncated to the millisecond precision timestamps are stored with
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, millis))
}

/// Wrap a decoding failure for a TEXT column as a rusqlite error
pub fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
