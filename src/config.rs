use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_SECS: u64 = 2;
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_SETTLE_SECS: u64 = 3;
const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SyncConfig {
  /// Sheets endpoint, usually the proxy's `/api/sheets`.
  pub remote_url: String,
  pub api_key: String,
  pub report_url: Option<String>,
  pub request_timeout: Duration,
  pub cooldown: Duration,
  pub debounce: Duration,
  pub poll_interval: Duration,
  pub settle_delay: Duration,
  pub reachability_url: Option<String>,
  pub reachability_timeout: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      remote_url: "http://127.0.0.1:8787/api/sheets".to_string(),
      api_key: String::new(),
      report_url: None,
      request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
      cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
      debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
      poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
      settle_delay: Duration::from_secs(DEFAULT_SETTLE_SECS),
      reachability_url: None,
      reachability_timeout: Duration::from_secs(DEFAULT_REACHABILITY_TIMEOUT_SECS),
    }
  }
}

impl SyncConfig {
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      remote_url: env_string("FINTRACK_REMOTE_URL").unwrap_or(defaults.remote_url),
      api_key: env_string("FINTRACK_API_KEY").unwrap_or_default(),
      report_url: env_string("FINTRACK_REPORT_URL"),
      request_timeout: env_secs("FINTRACK_REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout),
      cooldown: env_secs("FINTRACK_SYNC_COOLDOWN_SECS").unwrap_or(defaults.cooldown),
      debounce: env_secs("FINTRACK_SYNC_DEBOUNCE_SECS").unwrap_or(defaults.debounce),
      poll_interval: env_secs("FINTRACK_POLL_SECS").unwrap_or(defaults.poll_interval),
      settle_delay: env_secs("FINTRACK_SETTLE_SECS").unwrap_or(defaults.settle_delay),
      reachability_url: env_string("FINTRACK_REACHABILITY_URL"),
      reachability_timeout: env_secs("FINTRACK_REACHABILITY_TIMEOUT_SECS").unwrap_or(defaults.reachability_timeout),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
  pub bind: String,
  pub sheets_url: Option<String>,
  pub sheets_api_key: Option<String>,
  pub client_key: Option<String>,
  pub gemini_api_key: Option<String>,
  pub gemini_model: String,
  pub gemini_api_base: String,
  pub upstream_timeout: Duration,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      bind: "0.0.0.0:8787".to_string(),
      sheets_url: None,
      sheets_api_key: None,
      client_key: None,
      gemini_api_key: None,
      gemini_model: "gemini-1.5-flash".to_string(),
      gemini_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
      upstream_timeout: Duration::from_secs(30),
    }
  }
}

impl ProxyConfig {
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      bind: env_string("PROXY_BIND").unwrap_or(defaults.bind),
      sheets_url: env_string("SHEETS_API_URL"),
      sheets_api_key: env_string("SHEETS_API_KEY"),
      client_key: env_string("PROXY_CLIENT_KEY"),
      gemini_api_key: env_string("GEMINI_API_KEY"),
      gemini_model: env_string("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
      gemini_api_base: env_string("GEMINI_API_BASE").unwrap_or(defaults.gemini_api_base),
      upstream_timeout: env_secs("PROXY_UPSTREAM_TIMEOUT_SECS").unwrap_or(defaults.upstream_timeout),
    }
  }
}

fn env_string(key: &str) -> Option<String> {
  std::env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
  env_string(key)
    .and_then(|value| value.parse::<u64>().ok())
    .map(Duration::from_secs)
}
