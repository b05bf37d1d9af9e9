#![allow(dead_code)]

pub mod upstream;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use fintrack_sync::gateway::{GatewayError, RemoteGateway, RemoteRequest};
use fintrack_sync::{LocalStore, SyncConfig, SyncCoordinator, TransactionInput, TxType};

/// Sheet stand-in keyed by uuid / month, so repeated uploads overwrite instead of appending.
#[derive(Default)]
pub struct FakeRemote {
  state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
  transactions: BTreeMap<String, Value>,
  budgets: BTreeMap<String, Value>,
  offline: bool,
  fail_downloads: bool,
  strict_deletes: bool,
  failing_uploads: HashSet<String>,
  delay: Option<Duration>,
  requests: Vec<&'static str>,
}

impl FakeRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn state(&self) -> MutexGuard<'_, FakeState> {
    self.state.lock().unwrap()
  }

  pub fn set_offline(&self, offline: bool) {
    self.state().offline = offline;
  }

  pub fn fail_downloads(&self, fail: bool) {
    self.state().fail_downloads = fail;
  }

  pub fn fail_upload_of(&self, uuid: &str) {
    self.state().failing_uploads.insert(uuid.to_string());
  }

  /// Deletes of uuids the sheet does not hold are rejected the way the Apps Script does.
  pub fn reject_unknown_deletes(&self) {
    self.state().strict_deletes = true;
  }

  pub fn remove_transaction(&self, uuid: &str) {
    self.state().transactions.remove(uuid);
  }

  pub fn clear_upload_failures(&self) {
    self.state().failing_uploads.clear();
  }

  pub fn set_delay(&self, delay: Duration) {
    self.state().delay = Some(delay);
  }

  pub fn seed_transaction(&self, row: Value) {
    let uuid = row["uuid"].as_str().unwrap().to_string();
    self.state().transactions.insert(uuid, row);
  }

  pub fn seed_budget(&self, month_year: &str, amount: f64) {
    self
      .state()
      .budgets
      .insert(month_year.to_string(), json!({ "monthYear": month_year, "amount": amount }));
  }

  pub fn transactions(&self) -> Vec<Value> {
    self.state().transactions.values().cloned().collect()
  }

  pub fn transaction(&self, uuid: &str) -> Option<Value> {
    self.state().transactions.get(uuid).cloned()
  }

  pub fn budget(&self, month_year: &str) -> Option<Value> {
    self.state().budgets.get(month_year).cloned()
  }

  pub fn request_count(&self, action: &str) -> usize {
    self.state().requests.iter().filter(|sent| **sent == action).count()
  }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
  async fn send(&self, request: RemoteRequest) -> Result<Value, GatewayError> {
    let delay = {
      let mut state = self.state();
      state.requests.push(request.action());
      if state.offline {
        return Err(GatewayError::Transport("connection refused".to_string()));
      }
      state.delay
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.state();
    let action = request.action();
    match request {
      RemoteRequest::AddTransaction(tx) | RemoteRequest::UpdateTransaction(tx) => {
        if state.failing_uploads.contains(&tx.uuid) {
          return Err(GatewayError::Application {
            action,
            status: 200,
            message: "sheet is locked".to_string(),
          });
        }
        state.transactions.insert(tx.uuid.clone(), tx.to_wire());
        Ok(json!({ "success": true }))
      }
      RemoteRequest::DeleteTransaction { uuid } => {
        if state.transactions.remove(&uuid).is_none() && state.strict_deletes {
          return Err(GatewayError::Application {
            action,
            status: 200,
            message: "Transaction not found".to_string(),
          });
        }
        Ok(json!({ "success": true }))
      }
      RemoteRequest::SetBudget(budget) => {
        state.budgets.insert(budget.month_year.clone(), budget.to_wire());
        Ok(json!({ "success": true }))
      }
      RemoteRequest::GetTransactions | RemoteRequest::GetBudgets if state.fail_downloads => {
        Err(GatewayError::Transport("connection reset".to_string()))
      }
      RemoteRequest::GetTransactions => Ok(json!({ "data": state.transactions.values().cloned().collect::<Vec<_>>() })),
      RemoteRequest::GetBudgets => Ok(json!({ "data": state.budgets.values().cloned().collect::<Vec<_>>() })),
    }
  }
}

pub struct Harness {
  pub remote: Arc<FakeRemote>,
  pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
  pub fn store(&self) -> &LocalStore {
    self.coordinator.store()
  }
}

pub fn test_config() -> SyncConfig {
  SyncConfig {
    cooldown: Duration::from_secs(30),
    debounce: Duration::from_secs(2),
    request_timeout: Duration::from_secs(5),
    ..SyncConfig::default()
  }
}

pub fn harness() -> Harness {
  harness_with(test_config())
}

pub fn harness_with(config: SyncConfig) -> Harness {
  let remote = FakeRemote::new();
  let store = Arc::new(LocalStore::in_memory().unwrap());
  let coordinator = Arc::new(SyncCoordinator::new(store, remote.clone(), config).unwrap());
  Harness { remote, coordinator }
}

pub fn expense(amount: f64, category: &str, date: &str) -> TransactionInput {
  TransactionInput {
    tx_type: TxType::Expense,
    amount,
    category: category.to_string(),
    date: date.to_string(),
    notes: None,
  }
}
