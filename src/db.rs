use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::dates::{self, DateInput};
use crate::error::AppError;

const DB_FILE_NAME: &str = "fintrack.sqlite";

pub struct Db {
  pub conn: Mutex<Connection>,
  pub db_path: PathBuf,
}

impl Db {
  pub fn open(db_path: &Path) -> Result<Self, AppError> {
    open_path(db_path)
  }

  pub fn open_in_memory() -> Result<Self, AppError> {
    open_in_memory()
  }
}

pub fn resolve_app_dir() -> Result<PathBuf, AppError> {
  if let Ok(explicit) = std::env::var("FINTRACK_DATA_DIR") {
    if !explicit.trim().is_empty() {
      return Ok(PathBuf::from(explicit));
    }
  }

  if let Some(portable) = resolve_portable_dir()? {
    return Ok(portable);
  }

  let base = dirs_next::data_local_dir()
    .ok_or_else(|| AppError::new("PATH", "Local data directory not found"))?;
  Ok(base.join("FinTrack"))
}

pub fn init_db(app_dir: &Path) -> Result<Db, AppError> {
  fs::create_dir_all(app_dir)?;
  open_path(&app_dir.join(DB_FILE_NAME))
}

pub fn open_path(db_path: &Path) -> Result<Db, AppError> {
  let mut conn = Connection::open(db_path)?;
  conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
  conn.busy_timeout(Duration::from_secs(5))?;

  run_migrations(&mut conn)?;

  Ok(Db {
    conn: Mutex::new(conn),
    db_path: db_path.to_path_buf(),
  })
}

pub fn open_in_memory() -> Result<Db, AppError> {
  let mut conn = Connection::open_in_memory()?;
  run_migrations(&mut conn)?;
  Ok(Db {
    conn: Mutex::new(conn),
    db_path: PathBuf::from(":memory:"),
  })
}

pub fn with_conn<T>(db: &Db, f: impl FnOnce(&mut Connection) -> Result<T, AppError>) -> Result<T, AppError> {
  let mut guard = db.conn.lock()?;
  f(&mut guard)
}

fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
  conn.execute_batch(
    "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
  )?;

  apply_migration(conn, "001_init", |tx| {
    tx.execute_batch(include_str!("../migrations/001_init.sql"))?;
    Ok(())
  })?;
  apply_migration(conn, "002_legacy_rows", |tx| {
    let filled = backfill_uuids(tx)?;
    if filled > 0 {
      log::info!("Assigned uuids to {filled} existing transactions");
    }
    let rewritten = normalize_legacy_dates(tx)?;
    if rewritten > 0 {
      log::info!("Normalized {rewritten} legacy transaction dates");
    }
    Ok(())
  })?;
  apply_migration(conn, "003_sync_bookkeeping", |tx| {
    tx.execute_batch(include_str!("../migrations/003_sync_bookkeeping.sql"))?;
    Ok(())
  })?;
  apply_migration(conn, "004_remote_known", |tx| {
    tx.execute_batch(include_str!("../migrations/004_remote_known.sql"))?;
    Ok(())
  })?;
  Ok(())
}

fn apply_migration(
  conn: &mut Connection,
  version: &str,
  step: impl FnOnce(&Transaction) -> Result<(), AppError>,
) -> Result<(), AppError> {
  let exists: i64 = conn.query_row(
    "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
    params![version],
    |row| row.get(0),
  )?;
  if exists > 0 {
    return Ok(());
  }

  let tx = conn.transaction()?;
  step(&tx)?;
  tx.execute(
    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
    params![version, Utc::now().to_rfc3339()],
  )?;
  tx.commit()?;
  Ok(())
}

/// Databases created before stable ids existed have no `uuid` column; add it and fill every row.
fn backfill_uuids(conn: &Connection) -> Result<usize, AppError> {
  if !has_column(conn, "transactions", "uuid")? {
    conn.execute_batch("ALTER TABLE transactions ADD COLUMN uuid TEXT")?;
  }

  let mut stmt = conn.prepare("SELECT id FROM transactions WHERE uuid IS NULL OR uuid = ''")?;
  let ids = stmt
    .query_map([], |row| row.get::<_, i64>(0))?
    .collect::<Result<Vec<_>, _>>()?;

  for id in &ids {
    conn.execute(
      "UPDATE transactions SET uuid = ?1 WHERE id = ?2",
      params![Uuid::new_v4().to_string(), id],
    )?;
  }
  Ok(ids.len())
}

fn normalize_legacy_dates(conn: &Connection) -> Result<usize, AppError> {
  let mut stmt = conn.prepare("SELECT id, date FROM transactions")?;
  let rows = stmt
    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
    .collect::<Result<Vec<_>, _>>()?;

  let mut rewritten = 0;
  for (id, date) in rows {
    let canonical = dates::to_storage(&dates::normalize(&DateInput::from(date.as_str())));
    if canonical != date {
      conn.execute("UPDATE transactions SET date = ?1 WHERE id = ?2", params![canonical, id])?;
      rewritten += 1;
    }
  }
  Ok(rewritten)
}

pub fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, AppError> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
  for name in names {
    if name?.eq_ignore_ascii_case(column) {
      return Ok(true);
    }
  }
  Ok(false)
}

fn resolve_portable_dir() -> Result<Option<PathBuf>, AppError> {
  let env_enabled = std::env::var("FINTRACK_PORTABLE")
    .ok()
    .map(|value| {
      let value = value.to_ascii_lowercase();
      value == "1" || value == "true" || value == "yes"
    })
    .unwrap_or(false);

  let exe_dir = std::env::current_exe()
    .ok()
    .and_then(|path| path.parent().map(|parent| parent.to_path_buf()));

  if let Some(exe_dir) = exe_dir {
    let flag = exe_dir.join("portable.flag");
    let data_dir = exe_dir.join("data");
    if env_enabled || flag.exists() {
      fs::create_dir_all(&data_dir)?;
      return Ok(Some(data_dir));
    }
  }

  Ok(None)
}
