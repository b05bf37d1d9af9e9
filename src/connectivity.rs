use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::gateway::GatewayError;
use crate::sync::{SyncCoordinator, SyncOutcome, SyncTrigger};

#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
  async fn is_reachable(&self) -> bool;
}

/// Any HTTP answer from the target URL counts as reachable, including error statuses.
pub struct HttpReachability {
  client: Client,
  url: String,
}

impl HttpReachability {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
    Ok(Self {
      client: Client::builder().timeout(timeout).build()?,
      url: url.into(),
    })
  }

  /// Checks `reachability_url` when set, otherwise the sheets endpoint itself.
  pub fn from_config(config: &SyncConfig) -> Result<Self, GatewayError> {
    let url = config.reachability_url.clone().unwrap_or_else(|| config.remote_url.clone());
    Self::new(url, config.reachability_timeout)
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

#[async_trait]
impl ReachabilityCheck for HttpReachability {
  async fn is_reachable(&self) -> bool {
    match self.client.head(&self.url).send().await {
      Ok(_) => true,
      Err(err) => {
        log::debug!("reachability check {} failed: {err}", self.url);
        false
      }
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
  Online,
  Offline,
  Unknown,
}

pub struct ConnectivityMonitor {
  check: Arc<dyn ReachabilityCheck>,
  coordinator: Arc<SyncCoordinator>,
  status: Mutex<NetworkStatus>,
  poll_interval: Duration,
  settle_delay: Duration,
}

impl ConnectivityMonitor {
  pub fn new(check: Arc<dyn ReachabilityCheck>, coordinator: Arc<SyncCoordinator>) -> Self {
    let poll_interval = coordinator.config().poll_interval;
    let settle_delay = coordinator.config().settle_delay;
    Self {
      check,
      coordinator,
      status: Mutex::new(NetworkStatus::Unknown),
      poll_interval,
      settle_delay,
    }
  }

  pub fn current_status(&self) -> NetworkStatus {
    *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn is_online(&self) -> bool {
    self.current_status() == NetworkStatus::Online
  }

  fn record(&self, status: NetworkStatus) -> NetworkStatus {
    let mut guard = self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = *guard;
    *guard = status;
    self.coordinator.set_online(status == NetworkStatus::Online);
    previous
  }

  /// One poll step. Returns the outcome when it started a sync.
  pub async fn sample(&self) -> Option<SyncOutcome> {
    let reachable = self.check.is_reachable().await;
    if !reachable {
      if self.record(NetworkStatus::Offline) != NetworkStatus::Offline {
        log::warn!("network offline");
      }
      return None;
    }

    let previous = self.record(NetworkStatus::Online);
    if !self.coordinator.needs_sync() || self.coordinator.is_syncing() {
      return None;
    }

    if previous == NetworkStatus::Online {
      return Some(self.coordinator.trigger_sync(SyncTrigger::Poll).await);
    }

    log::info!("network online, catching up in {:?}", self.settle_delay);
    tokio::time::sleep(self.settle_delay).await;
    if !self.check.is_reachable().await {
      self.record(NetworkStatus::Offline);
      log::warn!("connection dropped while settling");
      return None;
    }
    Some(self.coordinator.trigger_sync(SyncTrigger::Reconnect).await)
  }

  pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.poll_interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if let Some(outcome) = self.sample().await {
          log::debug!("connectivity-triggered sync: {outcome:?}");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use serde_json::Value;

  use super::*;
  use crate::gateway::{RemoteGateway, RemoteRequest};
  use crate::models::{TransactionInput, TxType};
  use crate::store::LocalStore;

  struct Toggle(AtomicBool);

  #[async_trait]
  impl ReachabilityCheck for Toggle {
    async fn is_reachable(&self) -> bool {
      self.0.load(Ordering::SeqCst)
    }
  }

  /// Answers in order, then keeps repeating the last answer.
  struct Scripted(Mutex<VecDeque<bool>>);

  impl Scripted {
    fn new(answers: &[bool]) -> Arc<Self> {
      Arc::new(Self(Mutex::new(answers.iter().copied().collect())))
    }
  }

  #[async_trait]
  impl ReachabilityCheck for Scripted {
    async fn is_reachable(&self) -> bool {
      let mut answers = self.0.lock().unwrap();
      if answers.len() > 1 {
        answers.pop_front().unwrap()
      } else {
        answers.front().copied().unwrap_or(false)
      }
    }
  }

  #[derive(Default)]
  struct EmptyRemote {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl RemoteGateway for EmptyRemote {
    async fn send(&self, _request: RemoteRequest) -> Result<Value, GatewayError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(serde_json::json!({ "data": [] }))
    }
  }

  fn coordinator(remote: Arc<EmptyRemote>) -> Arc<SyncCoordinator> {
    let config = SyncConfig {
      cooldown: Duration::ZERO,
      settle_delay: Duration::from_millis(10),
      ..SyncConfig::default()
    };
    let store = Arc::new(LocalStore::in_memory().unwrap());
    Arc::new(SyncCoordinator::new(store, remote, config).unwrap())
  }

  fn monitor(online: bool) -> (Arc<ConnectivityMonitor>, Arc<Toggle>, Arc<SyncCoordinator>) {
    let coordinator = coordinator(Arc::new(EmptyRemote::default()));
    let check = Arc::new(Toggle(AtomicBool::new(online)));
    let monitor = Arc::new(ConnectivityMonitor::new(check.clone(), coordinator.clone()));
    (monitor, check, coordinator)
  }

  fn lunch() -> TransactionInput {
    TransactionInput {
      tx_type: TxType::Expense,
      amount: 10.0,
      category: "Food".to_string(),
      date: "2024-03-05".to_string(),
      notes: None,
    }
  }

  #[tokio::test]
  async fn reconnect_with_pending_work_syncs() {
    let (monitor, check, coordinator) = monitor(false);
    assert_eq!(monitor.sample().await, None);
    assert!(!coordinator.is_online());

    coordinator.store().add(lunch()).unwrap();
    assert_eq!(coordinator.trigger_sync(SyncTrigger::Mutation).await, SyncOutcome::Offline);
    assert!(coordinator.needs_sync());

    check.0.store(true, Ordering::SeqCst);
    let outcome = monitor.sample().await;
    assert!(matches!(outcome, Some(SyncOutcome::Completed(_))));
    assert!(monitor.is_online());
    assert!(!coordinator.needs_sync());
    assert_eq!(coordinator.status().pending_count, 0);
  }

  #[tokio::test]
  async fn online_without_pending_work_stays_quiet() {
    let (monitor, _check, coordinator) = monitor(true);
    assert_eq!(monitor.sample().await, None);
    assert_eq!(monitor.current_status(), NetworkStatus::Online);
    assert!(coordinator.is_online());
  }

  #[tokio::test(start_paused = true)]
  async fn connection_lost_while_settling_skips_the_sync() {
    let remote = Arc::new(EmptyRemote::default());
    let coordinator = coordinator(remote.clone());
    coordinator.store().add(lunch()).unwrap();
    assert_eq!(coordinator.on_startup().await, SyncOutcome::Skipped);
    assert!(coordinator.needs_sync());

    let monitor = ConnectivityMonitor::new(Scripted::new(&[true, false]), coordinator.clone());
    assert_eq!(monitor.sample().await, None);
    assert_eq!(monitor.current_status(), NetworkStatus::Offline);
    assert!(!coordinator.is_online());
    assert!(coordinator.needs_sync());
    assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    assert_eq!(coordinator.status().pending_count, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn steady_connection_retries_leftover_work() {
    let remote = Arc::new(EmptyRemote::default());
    let coordinator = coordinator(remote.clone());
    let monitor = ConnectivityMonitor::new(Scripted::new(&[true]), coordinator.clone());

    assert_eq!(monitor.sample().await, None);
    assert!(monitor.is_online());
    assert_eq!(remote.calls.load(Ordering::SeqCst), 0);

    coordinator.store().add(lunch()).unwrap();
    assert_eq!(coordinator.on_startup().await, SyncOutcome::Skipped);
    assert!(coordinator.needs_sync());

    let outcome = monitor.sample().await;
    assert!(matches!(outcome, Some(SyncOutcome::Completed(_))));
    assert!(!coordinator.needs_sync());
    assert_eq!(coordinator.status().pending_count, 0);
    let log = coordinator.recent_sync_log(1).unwrap();
    assert_eq!(log[0].reason, "poll");
  }

  #[test]
  fn reachability_target_defaults_to_remote_url() {
    let config = SyncConfig {
      remote_url: "http://sheets.local/api/sheets".to_string(),
      ..SyncConfig::default()
    };
    assert_eq!(HttpReachability::from_config(&config).unwrap().url(), "http://sheets.local/api/sheets");

    let explicit = SyncConfig {
      reachability_url: Some("http://gateway.local/".to_string()),
      ..config
    };
    assert_eq!(HttpReachability::from_config(&explicit).unwrap().url(), "http://gateway.local/");
  }

  #[tokio::test]
  async fn refused_connection_is_unreachable() {
    let config = SyncConfig {
      reachability_url: Some("http://127.0.0.1:1/".to_string()),
      reachability_timeout: Duration::from_secs(2),
      ..SyncConfig::default()
    };
    let check = HttpReachability::from_config(&config).unwrap();
    assert!(!check.is_reachable().await);
  }
}
