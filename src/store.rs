use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::dates::{self, CanonicalInstant, DateInput};
use crate::db::{self, Db};
use crate::domain::validation;
use crate::error::AppError;
use crate::gateway::{RemoteBudget, RemoteTransaction};
use crate::models::{Budget, MonthSummary, PendingTransaction, SyncState, Transaction, TransactionInput, TxType};
use crate::reports;

const TX_COLUMNS: &str = "uuid, type, amount, category, date, notes, isSynced";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
  pub inserted: usize,
  pub updated: usize,
  pub skipped_dirty: usize,
  pub skipped_deleted: usize,
  pub unchanged: usize,
}

impl MergeStats {
  pub fn merged(&self) -> usize {
    self.inserted + self.updated
  }
}

/// Durable CRUD for transactions and budgets. Writes never touch the network.
pub struct LocalStore {
  db: Db,
}

impl LocalStore {
  pub fn new(db: Db) -> Self {
    Self { db }
  }

  pub fn init(app_dir: &Path) -> Result<Self, AppError> {
    Ok(Self::new(db::init_db(app_dir)?))
  }

  pub fn in_memory() -> Result<Self, AppError> {
    Ok(Self::new(db::open_in_memory()?))
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub fn add(&self, input: TransactionInput) -> Result<Transaction, AppError> {
    db::with_conn(&self.db, |conn| insert_transaction(conn, &input))
  }

  pub fn update(&self, uuid: &str, input: TransactionInput) -> Result<usize, AppError> {
    db::with_conn(&self.db, |conn| update_transaction(conn, uuid, &input))
  }

  pub fn delete(&self, uuid: &str) -> Result<usize, AppError> {
    db::with_conn(&self.db, |conn| mark_deleted(conn, uuid))
  }

  pub fn get(&self, uuid: &str) -> Result<Option<Transaction>, AppError> {
    db::with_conn(&self.db, |conn| get_transaction(conn, uuid))
  }

  pub fn list(&self) -> Result<Vec<Transaction>, AppError> {
    db::with_conn(&self.db, |conn| list_transactions(conn))
  }

  pub fn count(&self) -> Result<i64, AppError> {
    db::with_conn(&self.db, |conn| count_transactions(conn))
  }

  pub fn set_budget(&self, month_year: &str, amount: f64) -> Result<Budget, AppError> {
    db::with_conn(&self.db, |conn| set_budget(conn, month_year, amount))
  }

  pub fn get_budget(&self, month_year: &str) -> Result<Option<Budget>, AppError> {
    db::with_conn(&self.db, |conn| get_budget(conn, month_year))
  }

  pub fn list_budgets(&self) -> Result<Vec<Budget>, AppError> {
    db::with_conn(&self.db, |conn| list_budgets(conn))
  }

  pub fn month_summary(&self, month_year: &str) -> Result<MonthSummary, AppError> {
    db::with_conn(&self.db, |conn| reports::month_summary(conn, month_year))
  }
}

pub fn insert_transaction(conn: &Connection, input: &TransactionInput) -> Result<Transaction, AppError> {
  validation::ensure_amount_non_negative(input.amount)?;
  validation::ensure_category(&input.category)?;

  let transaction = Transaction {
    uuid: Uuid::new_v4().to_string(),
    tx_type: input.tx_type,
    amount: input.amount,
    category: input.category.trim().to_string(),
    date: dates::to_storage(&dates::normalize(&DateInput::from(input.date.as_str()))),
    notes: clean_notes(input.notes.as_deref()),
    sync_state: SyncState::Dirty,
  };

  conn.execute(
    "INSERT INTO transactions (uuid, type, amount, category, date, notes, isSynced) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
    params![
      transaction.uuid,
      transaction.tx_type.as_str(),
      transaction.amount,
      transaction.category,
      transaction.date,
      transaction.notes,
    ],
  )?;
  Ok(transaction)
}

/// Returns the number of rows touched; zero means the uuid is unknown or already deleted.
pub fn update_transaction(conn: &Connection, uuid: &str, input: &TransactionInput) -> Result<usize, AppError> {
  validation::ensure_amount_non_negative(input.amount)?;
  validation::ensure_category(&input.category)?;

  let date = dates::to_storage(&dates::normalize(&DateInput::from(input.date.as_str())));
  let changed = conn.execute(
    "UPDATE transactions SET type = ?2, amount = ?3, category = ?4, date = ?5, notes = ?6, isSynced = 0, revision = revision + 1
     WHERE uuid = ?1 AND deleted = 0",
    params![
      uuid,
      input.tx_type.as_str(),
      input.amount,
      input.category.trim(),
      date,
      clean_notes(input.notes.as_deref()),
    ],
  )?;
  if changed == 0 {
    log::debug!("update for unknown transaction {uuid} ignored");
  }
  Ok(changed)
}

pub fn mark_deleted(conn: &Connection, uuid: &str) -> Result<usize, AppError> {
  let changed = conn.execute(
    "UPDATE transactions SET deleted = 1, deleted_at = ?2, isSynced = 0, revision = revision + 1
     WHERE uuid = ?1 AND deleted = 0",
    params![uuid, Utc::now().to_rfc3339()],
  )?;
  Ok(changed)
}

pub fn get_transaction(conn: &Connection, uuid: &str) -> Result<Option<Transaction>, AppError> {
  let transaction = conn
    .query_row(
      &format!("SELECT {TX_COLUMNS} FROM transactions WHERE uuid = ?1 AND deleted = 0"),
      params![uuid],
      map_transaction,
    )
    .optional()?;
  Ok(transaction)
}

pub fn list_transactions(conn: &Connection) -> Result<Vec<Transaction>, AppError> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {TX_COLUMNS} FROM transactions WHERE deleted = 0 ORDER BY date DESC, id DESC"
  ))?;
  let rows = stmt.query_map([], map_transaction)?;
  Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_transactions(conn: &Connection) -> Result<i64, AppError> {
  let count = conn.query_row("SELECT COUNT(*) FROM transactions WHERE deleted = 0", [], |row| row.get(0))?;
  Ok(count)
}

/// Dirty rows including tombstones, oldest write first.
pub fn list_pending(conn: &Connection) -> Result<Vec<PendingTransaction>, AppError> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {TX_COLUMNS}, deleted, revision, remoteKnown FROM transactions WHERE isSynced = 0 ORDER BY id"
  ))?;
  let rows = stmt.query_map([], |row| {
    Ok(PendingTransaction {
      transaction: map_transaction(row)?,
      deleted: row.get::<_, i64>(7)? == 1,
      revision: row.get(8)?,
      remote_known: row.get::<_, i64>(9)? == 1,
    })
  })?;
  Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_pending(conn: &Connection) -> Result<i64, AppError> {
  let transactions: i64 = conn.query_row("SELECT COUNT(*) FROM transactions WHERE isSynced = 0", [], |row| row.get(0))?;
  let budgets: i64 = conn.query_row("SELECT COUNT(*) FROM budgets WHERE isSynced = 0", [], |row| row.get(0))?;
  Ok(transactions + budgets)
}

/// Flips a row to synced unless it was written again after `revision` was read.
pub fn mark_synced_if_unchanged(conn: &Connection, uuid: &str, revision: i64) -> Result<bool, AppError> {
  let changed = conn.execute(
    "UPDATE transactions SET isSynced = 1, remoteKnown = 1 WHERE uuid = ?1 AND revision = ?2 AND deleted = 0",
    params![uuid, revision],
  )?;
  Ok(changed > 0)
}

/// Records that an upload reached the remote, even if it was not acknowledged.
pub fn mark_remote_known(conn: &Connection, uuid: &str) -> Result<(), AppError> {
  conn.execute("UPDATE transactions SET remoteKnown = 1 WHERE uuid = ?1", params![uuid])?;
  Ok(())
}

/// Drops a tombstone once the remote delete is confirmed.
pub fn purge_if_unchanged(conn: &Connection, uuid: &str, revision: i64) -> Result<bool, AppError> {
  let changed = conn.execute(
    "DELETE FROM transactions WHERE uuid = ?1 AND revision = ?2 AND deleted = 1",
    params![uuid, revision],
  )?;
  Ok(changed > 0)
}

pub fn merge_remote_transactions(conn: &mut Connection, rows: &[RemoteTransaction]) -> Result<MergeStats, AppError> {
  let tx = conn.transaction()?;
  let mut stats = MergeStats::default();

  for remote in rows {
    let existing: Option<(i64, i64)> = tx
      .query_row(
        "SELECT isSynced, deleted FROM transactions WHERE uuid = ?1",
        params![remote.uuid],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match existing {
      None => {
        tx.execute(
          "INSERT INTO transactions (uuid, type, amount, category, date, notes, isSynced, remoteKnown)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 1)",
          params![
            remote.uuid,
            remote.tx_type.as_str(),
            remote.amount,
            remote.category,
            dates::to_storage(&remote.date),
            remote.notes,
          ],
        )?;
        stats.inserted += 1;
      }
      Some((_, 1)) => {
        stats.skipped_deleted += 1;
      }
      Some((0, _)) => {
        log::debug!("keeping unsent local edit of {}", remote.uuid);
        stats.skipped_dirty += 1;
      }
      Some(_) => {
        let Some(local) = get_transaction(&tx, &remote.uuid)? else {
          continue;
        };
        // The sheet only keeps the calendar day, so a same-day local time is kept.
        let date = if same_day(&local.date, &remote.date) {
          local.date.clone()
        } else {
          dates::to_storage(&remote.date)
        };
        let changed = date != local.date
          || local.tx_type != remote.tx_type
          || local.amount != remote.amount
          || local.category != remote.category
          || local.notes != remote.notes;
        if !changed {
          stats.unchanged += 1;
          continue;
        }
        tx.execute(
          "UPDATE transactions SET type = ?2, amount = ?3, category = ?4, date = ?5, notes = ?6, isSynced = 1, remoteKnown = 1
           WHERE uuid = ?1",
          params![
            remote.uuid,
            remote.tx_type.as_str(),
            remote.amount,
            remote.category,
            date,
            remote.notes,
          ],
        )?;
        stats.updated += 1;
      }
    }
  }

  tx.commit()?;
  Ok(stats)
}

pub fn set_budget(conn: &Connection, month_year: &str, amount: f64) -> Result<Budget, AppError> {
  let month_year = validation::parse_month_year(month_year)?;
  validation::ensure_amount_non_negative(amount)?;
  conn.execute(
    "INSERT OR REPLACE INTO budgets (monthYear, amount, isSynced) VALUES (?1, ?2, 0)",
    params![month_year, amount],
  )?;
  Ok(Budget {
    month_year,
    amount,
    sync_state: SyncState::Dirty,
  })
}

pub fn get_budget(conn: &Connection, month_year: &str) -> Result<Option<Budget>, AppError> {
  let budget = conn
    .query_row(
      "SELECT monthYear, amount, isSynced FROM budgets WHERE monthYear = ?1",
      params![month_year.trim()],
      map_budget,
    )
    .optional()?;
  Ok(budget)
}

pub fn list_budgets(conn: &Connection) -> Result<Vec<Budget>, AppError> {
  let mut stmt = conn.prepare("SELECT monthYear, amount, isSynced FROM budgets ORDER BY monthYear DESC")?;
  let rows = stmt.query_map([], map_budget)?;
  Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_dirty_budgets(conn: &Connection) -> Result<Vec<Budget>, AppError> {
  let mut stmt = conn.prepare("SELECT monthYear, amount, isSynced FROM budgets WHERE isSynced = 0 ORDER BY monthYear")?;
  let rows = stmt.query_map([], map_budget)?;
  Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn mark_budget_synced_if_unchanged(conn: &Connection, month_year: &str, amount: f64) -> Result<bool, AppError> {
  let changed = conn.execute(
    "UPDATE budgets SET isSynced = 1 WHERE monthYear = ?1 AND amount = ?2",
    params![month_year, amount],
  )?;
  Ok(changed > 0)
}

fn same_day(stored: &str, remote: &CanonicalInstant) -> bool {
  CanonicalInstant::from_storage(stored)
    .map(|local| local.date() == remote.date())
    .unwrap_or(false)
}

/// Remote budgets replace local ones, except months with an unsent local change.
pub fn merge_remote_budgets(conn: &mut Connection, rows: &[RemoteBudget]) -> Result<MergeStats, AppError> {
  let tx = conn.transaction()?;
  let mut stats = MergeStats::default();

  for remote in rows {
    let local: Option<(i64, f64)> = tx
      .query_row(
        "SELECT isSynced, amount FROM budgets WHERE monthYear = ?1",
        params![remote.month_year],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;
    match local {
      Some((0, _)) => {
        stats.skipped_dirty += 1;
        continue;
      }
      Some((_, amount)) if amount == remote.amount => {
        stats.unchanged += 1;
        continue;
      }
      _ => {}
    }
    tx.execute(
      "INSERT OR REPLACE INTO budgets (monthYear, amount, isSynced) VALUES (?1, ?2, 1)",
      params![remote.month_year, remote.amount],
    )?;
    if local.is_some() {
      stats.updated += 1;
    } else {
      stats.inserted += 1;
    }
  }

  tx.commit()?;
  Ok(stats)
}

fn map_transaction(row: &Row) -> rusqlite::Result<Transaction> {
  Ok(Transaction {
    uuid: row.get(0)?,
    tx_type: TxType::parse_lenient(&row.get::<_, String>(1)?),
    amount: row.get(2)?,
    category: row.get(3)?,
    date: row.get(4)?,
    notes: row.get(5)?,
    sync_state: SyncState::from_flag(row.get(6)?),
  })
}

fn map_budget(row: &Row) -> rusqlite::Result<Budget> {
  Ok(Budget {
    month_year: row.get(0)?,
    amount: row.get(1)?,
    sync_state: SyncState::from_flag(row.get(2)?),
  })
}

fn clean_notes(notes: Option<&str>) -> Option<String> {
  notes
    .map(str::trim)
    .filter(|value| !value.is_empty())
    .map(str::to_string)
}
