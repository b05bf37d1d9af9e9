use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
  Income,
  Expense,
}

impl TxType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TxType::Income => "income",
      TxType::Expense => "expense",
    }
  }

  /// Lenient parse used for stored and downloaded values; anything unknown counts as an expense.
  pub fn parse_lenient(value: &str) -> Self {
    if value.trim().eq_ignore_ascii_case("income") {
      TxType::Income
    } else {
      TxType::Expense
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
  Dirty,
  Synced,
}

impl SyncState {
  pub fn from_flag(is_synced: i64) -> Self {
    if is_synced == 1 {
      SyncState::Synced
    } else {
      SyncState::Dirty
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
  pub uuid: String,
  #[serde(rename = "type")]
  pub tx_type: TxType,
  pub amount: f64,
  pub category: String,
  /// Canonical RFC 3339 encoding at +05:30.
  pub date: String,
  pub notes: Option<String>,
  pub sync_state: SyncState,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransactionInput {
  #[serde(rename = "type")]
  pub tx_type: TxType,
  pub amount: f64,
  pub category: String,
  pub date: String,
  pub notes: Option<String>,
}

/// A dirty row as read by the upload phase, including delete intent and the revision it was read at.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
  pub transaction: Transaction,
  pub deleted: bool,
  pub revision: i64,
  /// Set once the remote may hold this uuid (uploaded, attempted, or downloaded).
  pub remote_known: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Budget {
  pub month_year: String,
  pub amount: f64,
  pub sync_state: SyncState,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonthSummary {
  pub month_year: String,
  pub income_total: f64,
  pub expense_total: f64,
  pub transaction_count: i64,
  pub budget: Option<f64>,
  pub budget_remaining: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
  Idle,
  Uploading,
  Downloading,
  Merging,
  Error,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncStatus {
  pub phase: SyncPhase,
  pub is_syncing: bool,
  pub needs_sync: bool,
  pub last_sync_at: Option<String>,
  pub last_error: Option<String>,
  pub pending_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SyncReport {
  pub uploaded: usize,
  pub deleted: usize,
  pub budgets_uploaded: usize,
  pub failed: usize,
  pub merged_transactions: usize,
  pub merged_budgets: usize,
  pub skipped_dirty: usize,
  pub last_row_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncLogEntry {
  pub ts: String,
  pub reason: String,
  pub outcome: String,
  pub uploaded: i64,
  pub failed: i64,
  pub merged: i64,
  pub error: Option<String>,
}
