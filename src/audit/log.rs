use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::AppError;
use crate::models::SyncLogEntry;

pub fn append_sync_log(
  conn: &Connection,
  reason: &str,
  outcome: &str,
  uploaded: usize,
  failed: usize,
  merged: usize,
  error: Option<&str>,
) -> Result<(), AppError> {
  let ts = Utc::now().to_rfc3339();
  conn.execute(
    "INSERT INTO sync_log (ts, reason, outcome, uploaded, failed, merged, error) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    params![ts, reason, outcome, uploaded as i64, failed as i64, merged as i64, error],
  )?;
  Ok(())
}

pub fn recent_sync_log(conn: &Connection, limit: usize) -> Result<Vec<SyncLogEntry>, AppError> {
  let mut stmt = conn.prepare(
    "SELECT ts, reason, outcome, uploaded, failed, merged, error FROM sync_log ORDER BY id DESC LIMIT ?1",
  )?;
  let rows = stmt.query_map(params![limit as i64], |row| {
    Ok(SyncLogEntry {
      ts: row.get(0)?,
      reason: row.get(1)?,
      outcome: row.get(2)?,
      uploaded: row.get(3)?,
      failed: row.get(4)?,
      merged: row.get(5)?,
      error: row.get(6)?,
    })
  })?;
  Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
