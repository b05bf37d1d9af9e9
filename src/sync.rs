use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::audit::log::{append_sync_log, recent_sync_log};
use crate::config::SyncConfig;
use crate::db;
use crate::error::AppError;
use crate::gateway::{GatewayError, RemoteBudget, RemoteGateway, RemoteTransaction};
use crate::models::{Budget, SyncLogEntry, SyncPhase, SyncReport, SyncStatus, Transaction, TransactionInput};
use crate::settings;
use crate::store::{self, LocalStore};

const MAX_DEFERRED_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  Startup,
  Mutation,
  Reconnect,
  /// Steady-state connectivity poll with pending work left over.
  Poll,
  Manual,
}

impl SyncTrigger {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTrigger::Startup => "startup",
      SyncTrigger::Mutation => "mutation",
      SyncTrigger::Reconnect => "reconnect",
      SyncTrigger::Poll => "poll",
      SyncTrigger::Manual => "manual",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
  Completed(SyncReport),
  /// Another cycle was in flight; the request is remembered through the needs-sync flag.
  AlreadyRunning,
  Cooldown(Duration),
  Offline,
  /// Nothing to do for this trigger (startup with local data present).
  Skipped,
  Failed(String),
}

#[derive(Debug)]
struct Bookkeeping {
  phase: SyncPhase,
  needs_sync: bool,
  last_error: Option<String>,
  last_sync_at: Option<String>,
  last_started: Option<Instant>,
}

/// Owns sync state and runs upload → download → merge cycles against one remote.
pub struct SyncCoordinator {
  store: Arc<LocalStore>,
  gateway: Arc<dyn RemoteGateway>,
  config: SyncConfig,
  in_progress: AtomicBool,
  online: AtomicBool,
  mutation_generation: AtomicU64,
  state: Mutex<Bookkeeping>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| InFlight(flag))
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl SyncCoordinator {
  pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>, config: SyncConfig) -> Result<Self, AppError> {
    let last_sync_at = db::with_conn(store.db(), |conn| settings::last_sync_at(conn))?;
    Ok(Self {
      store,
      gateway,
      config,
      in_progress: AtomicBool::new(false),
      online: AtomicBool::new(true),
      mutation_generation: AtomicU64::new(0),
      state: Mutex::new(Bookkeeping {
        phase: SyncPhase::Idle,
        needs_sync: false,
        last_error: None,
        last_sync_at,
        last_started: None,
      }),
    })
  }

  pub fn store(&self) -> &Arc<LocalStore> {
    &self.store
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  fn state(&self) -> MutexGuard<'_, Bookkeeping> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_phase(&self, phase: SyncPhase) {
    self.state().phase = phase;
  }

  pub fn status(&self) -> SyncStatus {
    let pending_count = db::with_conn(self.store.db(), |conn| store::count_pending(conn)).unwrap_or_else(|err| {
      log::warn!("pending count unavailable: {err}");
      0
    });
    let state = self.state();
    SyncStatus {
      phase: state.phase,
      is_syncing: self.is_syncing(),
      needs_sync: state.needs_sync,
      last_sync_at: state.last_sync_at.clone(),
      last_error: state.last_error.clone(),
      pending_count,
    }
  }

  pub fn last_error(&self) -> Option<String> {
    self.state().last_error.clone()
  }

  pub fn needs_sync(&self) -> bool {
    self.state().needs_sync
  }

  pub fn is_syncing(&self) -> bool {
    self.in_progress.load(Ordering::Acquire)
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::Release);
  }

  pub fn recent_sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, AppError> {
    db::with_conn(self.store.db(), |conn| recent_sync_log(conn, limit))
  }

  pub fn add_transaction(self: &Arc<Self>, input: TransactionInput) -> Result<Transaction, AppError> {
    let transaction = self.store.add(input)?;
    self.note_local_mutation();
    Ok(transaction)
  }

  pub fn update_transaction(self: &Arc<Self>, uuid: &str, input: TransactionInput) -> Result<usize, AppError> {
    let changed = self.store.update(uuid, input)?;
    if changed > 0 {
      self.note_local_mutation();
    }
    Ok(changed)
  }

  pub fn delete_transaction(self: &Arc<Self>, uuid: &str) -> Result<usize, AppError> {
    let changed = self.store.delete(uuid)?;
    if changed > 0 {
      self.note_local_mutation();
    }
    Ok(changed)
  }

  pub fn set_budget(self: &Arc<Self>, month_year: &str, amount: f64) -> Result<Budget, AppError> {
    let budget = self.store.set_budget(month_year, amount)?;
    self.note_local_mutation();
    Ok(budget)
  }

  /// Flags pending work and schedules a debounced sync. Only the latest mutation in a burst fires.
  pub fn note_local_mutation(self: &Arc<Self>) {
    self.state().needs_sync = true;
    let generation = self.mutation_generation.fetch_add(1, Ordering::AcqRel) + 1;

    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      log::debug!("no runtime, sync deferred until the next trigger");
      return;
    };
    let this = Arc::clone(self);
    handle.spawn(async move {
      tokio::time::sleep(this.config.debounce).await;
      for _ in 0..MAX_DEFERRED_ATTEMPTS {
        if this.mutation_generation.load(Ordering::Acquire) != generation {
          return;
        }
        match this.trigger_sync(SyncTrigger::Mutation).await {
          SyncOutcome::Cooldown(remaining) => tokio::time::sleep(remaining).await,
          SyncOutcome::AlreadyRunning => tokio::time::sleep(this.config.debounce).await,
          _ => return,
        }
      }
    });
  }

  pub async fn on_startup(&self) -> SyncOutcome {
    match self.store.count() {
      Ok(0) => self.trigger_sync(SyncTrigger::Startup).await,
      Ok(_) => {
        let pending = db::with_conn(self.store.db(), |conn| store::count_pending(conn)).unwrap_or(0);
        if pending > 0 {
          self.state().needs_sync = true;
        }
        SyncOutcome::Skipped
      }
      Err(err) => SyncOutcome::Failed(err.to_string()),
    }
  }

  /// Applies the scheduling policy, then runs a full cycle if allowed.
  pub async fn trigger_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
    if trigger != SyncTrigger::Manual {
      if !self.is_online() {
        self.state().needs_sync = true;
        return SyncOutcome::Offline;
      }
      let remaining = self.cooldown_remaining();
      if !remaining.is_zero() {
        self.state().needs_sync = true;
        log::debug!("{} sync deferred by cooldown ({remaining:?} left)", trigger.as_str());
        return SyncOutcome::Cooldown(remaining);
      }
    }
    self.run_cycle(trigger).await
  }

  pub async fn full_sync(&self) -> SyncOutcome {
    self.trigger_sync(SyncTrigger::Manual).await
  }

  fn cooldown_remaining(&self) -> Duration {
    match self.state().last_started {
      Some(started) => self.config.cooldown.saturating_sub(started.elapsed()),
      None => Duration::ZERO,
    }
  }

  async fn run_cycle(&self, trigger: SyncTrigger) -> SyncOutcome {
    let Some(_guard) = InFlight::acquire(&self.in_progress) else {
      self.state().needs_sync = true;
      return SyncOutcome::AlreadyRunning;
    };
    {
      let mut state = self.state();
      state.last_started = Some(Instant::now());
      state.needs_sync = false;
    }
    log::info!("sync started ({})", trigger.as_str());

    let mut report = SyncReport::default();

    self.set_phase(SyncPhase::Uploading);
    if let Err(err) = self.upload_phase(&mut report).await {
      return self.finish_failed(trigger, &report, err.to_string());
    }

    self.set_phase(SyncPhase::Downloading);
    let (transactions, budgets) = match self.download_phase().await {
      Ok(remote) => remote,
      Err(err) => return self.finish_failed(trigger, &report, err.to_string()),
    };

    self.set_phase(SyncPhase::Merging);
    if let Err(err) = self.merge_phase(&transactions, &budgets, &mut report) {
      return self.finish_failed(trigger, &report, err.to_string());
    }

    self.finish_completed(trigger, report)
  }

  /// Pushes dirty rows once, outside the scheduling policy. Still single-flight.
  pub async fn upload_pending(&self) -> Result<SyncReport, AppError> {
    let _guard = InFlight::acquire(&self.in_progress)
      .ok_or_else(|| AppError::new("SYNC_BUSY", "A sync is already running"))?;
    let mut report = SyncReport::default();
    self.upload_phase(&mut report).await?;
    Ok(report)
  }

  /// Pulls and merges the remote tables once, outside the scheduling policy.
  pub async fn download_and_merge(&self) -> Result<SyncReport, AppError> {
    let _guard = InFlight::acquire(&self.in_progress)
      .ok_or_else(|| AppError::new("SYNC_BUSY", "A sync is already running"))?;
    let mut report = SyncReport::default();
    let (transactions, budgets) = self.download_phase().await?;
    self.merge_phase(&transactions, &budgets, &mut report)?;
    Ok(report)
  }

  async fn bounded<T>(&self, call: impl Future<Output = Result<T, GatewayError>>) -> Result<T, GatewayError> {
    tokio::time::timeout(self.config.request_timeout, call)
      .await
      .map_err(|_| GatewayError::Timeout)?
  }

  // Rows go out one at a time so two writes to the same uuid never overlap.
  async fn upload_phase(&self, report: &mut SyncReport) -> Result<(), AppError> {
    let pending = db::with_conn(self.store.db(), |conn| store::list_pending(conn))?;

    for row in pending {
      let uuid = row.transaction.uuid.clone();
      if row.deleted {
        if !row.remote_known {
          log::debug!("{uuid} never reached the remote, dropping it locally");
          db::with_conn(self.store.db(), |conn| store::purge_if_unchanged(conn, &uuid, row.revision))?;
          report.deleted += 1;
          continue;
        }
        match self.bounded(self.gateway.delete_transaction(&uuid)).await {
          Ok(()) => {
            db::with_conn(self.store.db(), |conn| store::purge_if_unchanged(conn, &uuid, row.revision))?;
            report.deleted += 1;
          }
          Err(err) if err.is_not_found() => {
            log::debug!("remote has no {uuid}, delete counts as done");
            db::with_conn(self.store.db(), |conn| store::purge_if_unchanged(conn, &uuid, row.revision))?;
            report.deleted += 1;
          }
          Err(err) => {
            log::warn!("delete of {uuid} not confirmed: {err}");
            report.failed += 1;
            report.last_row_error = Some(err.to_string());
          }
        }
        continue;
      }

      match self.bounded(self.gateway.upsert_transaction(RemoteTransaction::from(&row))).await {
        Ok(()) => {
          let flipped = db::with_conn(self.store.db(), |conn| store::mark_synced_if_unchanged(conn, &uuid, row.revision))?;
          if !flipped {
            log::debug!("{uuid} changed during upload, stays dirty");
            db::with_conn(self.store.db(), |conn| store::mark_remote_known(conn, &uuid))?;
          }
          report.uploaded += 1;
        }
        Err(err) => {
          // Anything past a refused connection may have landed in the sheet.
          if !matches!(err, GatewayError::Transport(_)) {
            db::with_conn(self.store.db(), |conn| store::mark_remote_known(conn, &uuid))?;
          }
          log::warn!("upload of {uuid} failed: {err}");
          report.failed += 1;
          report.last_row_error = Some(err.to_string());
        }
      }
    }

    let budgets = db::with_conn(self.store.db(), |conn| store::list_dirty_budgets(conn))?;
    for budget in budgets {
      match self.bounded(self.gateway.set_budget(RemoteBudget::from(&budget))).await {
        Ok(()) => {
          db::with_conn(self.store.db(), |conn| {
            store::mark_budget_synced_if_unchanged(conn, &budget.month_year, budget.amount)
          })?;
          report.budgets_uploaded += 1;
        }
        Err(err) => {
          log::warn!("budget {} upload failed: {err}", budget.month_year);
          report.failed += 1;
          report.last_row_error = Some(err.to_string());
        }
      }
    }
    Ok(())
  }

  async fn download_phase(&self) -> Result<(Vec<RemoteTransaction>, Vec<RemoteBudget>), GatewayError> {
    let transactions = self.bounded(self.gateway.fetch_transactions()).await?;
    let budgets = self.bounded(self.gateway.fetch_budgets()).await?;
    log::debug!("downloaded {} transactions, {} budgets", transactions.len(), budgets.len());
    Ok((transactions, budgets))
  }

  fn merge_phase(
    &self,
    transactions: &[RemoteTransaction],
    budgets: &[RemoteBudget],
    report: &mut SyncReport,
  ) -> Result<(), AppError> {
    let (tx_stats, budget_stats) = db::with_conn(self.store.db(), |conn| {
      let tx_stats = store::merge_remote_transactions(conn, transactions)?;
      let budget_stats = store::merge_remote_budgets(conn, budgets)?;
      Ok((tx_stats, budget_stats))
    })?;
    report.merged_transactions += tx_stats.merged();
    report.merged_budgets += budget_stats.merged();
    report.skipped_dirty += tx_stats.skipped_dirty + budget_stats.skipped_dirty;
    Ok(())
  }

  fn finish_completed(&self, trigger: SyncTrigger, report: SyncReport) -> SyncOutcome {
    let now = Utc::now().to_rfc3339();
    let merged = report.merged_transactions + report.merged_budgets;
    let row_error = report
      .last_row_error
      .as_ref()
      .map(|err| format!("{} item(s) not synced: {err}", report.failed));

    let persisted = db::with_conn(self.store.db(), |conn| {
      settings::set_last_sync_at(conn, &now)?;
      append_sync_log(
        conn,
        trigger.as_str(),
        if report.failed > 0 { "partial" } else { "ok" },
        report.uploaded + report.deleted + report.budgets_uploaded,
        report.failed,
        merged,
        row_error.as_deref(),
      )
    });
    if let Err(err) = persisted {
      log::warn!("sync bookkeeping not persisted: {err}");
    }

    {
      let mut state = self.state();
      state.phase = SyncPhase::Idle;
      state.last_sync_at = Some(now);
      state.last_error = row_error;
      if report.failed > 0 {
        state.needs_sync = true;
      }
    }
    log::info!(
      "sync finished ({}): {} uploaded, {} deleted, {} failed, {} merged",
      trigger.as_str(),
      report.uploaded,
      report.deleted,
      report.failed,
      merged
    );
    SyncOutcome::Completed(report)
  }

  fn finish_failed(&self, trigger: SyncTrigger, report: &SyncReport, message: String) -> SyncOutcome {
    log::error!("sync failed ({}): {message}", trigger.as_str());
    let logged = db::with_conn(self.store.db(), |conn| {
      append_sync_log(
        conn,
        trigger.as_str(),
        "error",
        report.uploaded + report.deleted + report.budgets_uploaded,
        report.failed,
        0,
        Some(&message),
      )
    });
    if let Err(err) = logged {
      log::warn!("sync log not written: {err}");
    }

    let mut state = self.state();
    state.phase = SyncPhase::Error;
    state.needs_sync = true;
    state.last_error = Some(message.clone());
    SyncOutcome::Failed(message)
  }
}
