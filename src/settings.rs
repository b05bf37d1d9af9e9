use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;

pub const KEY_LAST_SYNC_AT: &str = "last_sync_at";

pub fn get_value(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
  let value = conn
    .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
    .optional()?;
  Ok(value)
}

pub fn set_value(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
  conn.execute(
    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
    params![key, value],
  )?;
  Ok(())
}

pub fn last_sync_at(conn: &Connection) -> Result<Option<String>, AppError> {
  get_value(conn, KEY_LAST_SYNC_AT)
}

pub fn set_last_sync_at(conn: &Connection, ts: &str) -> Result<(), AppError> {
  set_value(conn, KEY_LAST_SYNC_AT, ts)
}
