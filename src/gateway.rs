use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::SyncConfig;
use crate::dates::{self, CanonicalInstant, DateInput};
use crate::domain::validation;
use crate::models::{Budget, PendingTransaction, Transaction, TxType};

const DEFAULT_CATEGORY: &str = "Uncategorized";

#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("network unreachable: {0}")]
  Transport(String),
  #[error("request timed out")]
  Timeout,
  #[error("remote rejected {action} ({status}): {message}")]
  Application {
    action: &'static str,
    status: u16,
    message: String,
  },
  #[error("unreadable response: {0}")]
  Decode(String),
  #[error("{0} is not configured")]
  NotConfigured(&'static str),
}

impl GatewayError {
  pub fn is_transport(&self) -> bool {
    matches!(self, GatewayError::Transport(_) | GatewayError::Timeout)
  }

  /// The remote answered but has no such record.
  pub fn is_not_found(&self) -> bool {
    match self {
      GatewayError::Application { status, message, .. } => {
        *status == 404 || message.to_ascii_lowercase().contains("not found")
      }
      _ => false,
    }
  }
}

impl From<reqwest::Error> for GatewayError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      GatewayError::Timeout
    } else if err.is_decode() {
      GatewayError::Decode(err.to_string())
    } else {
      GatewayError::Transport(err.to_string())
    }
  }
}

/// A transaction as the spreadsheet sees it. The local row id never leaves the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTransaction {
  pub uuid: String,
  pub tx_type: TxType,
  pub amount: f64,
  pub category: String,
  pub date: CanonicalInstant,
  pub notes: Option<String>,
}

impl RemoteTransaction {
  pub fn from_local(transaction: &Transaction) -> Self {
    Self {
      uuid: transaction.uuid.clone(),
      tx_type: transaction.tx_type,
      amount: transaction.amount,
      category: transaction.category.clone(),
      date: CanonicalInstant::from_storage(&transaction.date)
        .unwrap_or_else(|| dates::normalize(&DateInput::from(transaction.date.as_str()))),
      notes: transaction.notes.clone(),
    }
  }

  pub fn to_wire(&self) -> Value {
    json!({
      "uuid": self.uuid,
      "type": self.tx_type.as_str(),
      "amount": self.amount,
      "category": self.category,
      "date": dates::to_remote_date_key(&self.date),
      "notes": self.notes.clone().unwrap_or_default(),
    })
  }

  /// Lenient decode of one sheet row; rows without a `uuid` are dropped.
  pub fn from_wire(value: &Value) -> Option<Self> {
    let uuid = text_field(value, "uuid")?;

    let amount = match value.get("amount").and_then(number_value) {
      Some(amount) if amount.is_finite() && amount >= 0.0 => amount,
      Some(amount) if amount.is_finite() => amount.abs(),
      _ => {
        log::warn!("remote transaction {uuid} has no usable amount, using 0");
        0.0
      }
    };

    Some(Self {
      tx_type: text_field(value, "type")
        .map(|raw| TxType::parse_lenient(&raw))
        .unwrap_or(TxType::Expense),
      amount,
      category: text_field(value, "category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
      date: dates::normalize(&DateInput::from_json(value.get("date").unwrap_or(&Value::Null))),
      notes: text_field(value, "notes"),
      uuid,
    })
  }
}

impl From<&PendingTransaction> for RemoteTransaction {
  fn from(pending: &PendingTransaction) -> Self {
    RemoteTransaction::from_local(&pending.transaction)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteBudget {
  pub month_year: String,
  pub amount: f64,
}

impl RemoteBudget {
  pub fn to_wire(&self) -> Value {
    json!({ "monthYear": self.month_year, "amount": self.amount })
  }

  pub fn from_wire(value: &Value) -> Option<Self> {
    let raw_month = value.get("monthYear")?;
    // Sheets tends to turn "2024-03" into a full date cell.
    let month_year = match raw_month.as_str().map(validation::parse_month_year) {
      Some(Ok(month)) => month,
      _ => dates::month_key(&dates::try_normalize(&DateInput::from_json(raw_month)).ok()?),
    };
    let amount = value.get("amount").and_then(number_value).unwrap_or(0.0).max(0.0);
    Some(Self { month_year, amount })
  }
}

impl From<&Budget> for RemoteBudget {
  fn from(budget: &Budget) -> Self {
    Self {
      month_year: budget.month_year.clone(),
      amount: budget.amount,
    }
  }
}

/// One variant per action understood by the sheets endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRequest {
  AddTransaction(RemoteTransaction),
  UpdateTransaction(RemoteTransaction),
  DeleteTransaction { uuid: String },
  GetTransactions,
  SetBudget(RemoteBudget),
  GetBudgets,
}

impl RemoteRequest {
  pub fn action(&self) -> &'static str {
    match self {
      RemoteRequest::AddTransaction(_) => "addTransaction",
      RemoteRequest::UpdateTransaction(_) => "updateTransaction",
      RemoteRequest::DeleteTransaction { .. } => "deleteTransaction",
      RemoteRequest::GetTransactions => "getTransactions",
      RemoteRequest::SetBudget(_) => "setBudget",
      RemoteRequest::GetBudgets => "getBudgets",
    }
  }

  pub fn is_read(&self) -> bool {
    matches!(self, RemoteRequest::GetTransactions | RemoteRequest::GetBudgets)
  }

  pub fn data(&self) -> Option<Value> {
    match self {
      RemoteRequest::AddTransaction(tx) | RemoteRequest::UpdateTransaction(tx) => Some(tx.to_wire()),
      RemoteRequest::DeleteTransaction { uuid } => Some(json!({ "uuid": uuid })),
      RemoteRequest::SetBudget(budget) => Some(budget.to_wire()),
      RemoteRequest::GetTransactions | RemoteRequest::GetBudgets => None,
    }
  }

  pub fn to_body(&self, api_key: &str) -> Value {
    let mut body = json!({ "apiKey": api_key, "action": self.action() });
    if let Some(data) = self.data() {
      body["data"] = data;
    }
    body
  }
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
  /// Performs one round trip. Implementations must not retry.
  async fn send(&self, request: RemoteRequest) -> Result<Value, GatewayError>;

  async fn upsert_transaction(&self, transaction: RemoteTransaction) -> Result<(), GatewayError> {
    self.send(RemoteRequest::AddTransaction(transaction)).await.map(|_| ())
  }

  async fn delete_transaction(&self, uuid: &str) -> Result<(), GatewayError> {
    self
      .send(RemoteRequest::DeleteTransaction { uuid: uuid.to_string() })
      .await
      .map(|_| ())
  }

  async fn fetch_transactions(&self) -> Result<Vec<RemoteTransaction>, GatewayError> {
    let value = self.send(RemoteRequest::GetTransactions).await?;
    Ok(decode_transactions(&value))
  }

  async fn set_budget(&self, budget: RemoteBudget) -> Result<(), GatewayError> {
    self.send(RemoteRequest::SetBudget(budget)).await.map(|_| ())
  }

  async fn fetch_budgets(&self) -> Result<Vec<RemoteBudget>, GatewayError> {
    let value = self.send(RemoteRequest::GetBudgets).await?;
    Ok(decode_budgets(&value))
  }
}

pub fn decode_transactions(value: &Value) -> Vec<RemoteTransaction> {
  let rows = list_payload(value);
  let decoded: Vec<RemoteTransaction> = rows.iter().filter_map(RemoteTransaction::from_wire).collect();
  if decoded.len() < rows.len() {
    log::warn!("skipped {} remote transactions without an id", rows.len() - decoded.len());
  }
  decoded
}

pub fn decode_budgets(value: &Value) -> Vec<RemoteBudget> {
  list_payload(value).iter().filter_map(RemoteBudget::from_wire).collect()
}

fn list_payload(value: &Value) -> &[Value] {
  match value {
    Value::Array(rows) => rows.as_slice(),
    Value::Object(_) => value
      .get("data")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or(&[]),
    _ => &[],
  }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
  match value.get(key)? {
    Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
    Value::Number(number) => Some(number.to_string()),
    _ => None,
  }
}

fn number_value(value: &Value) -> Option<f64> {
  match value {
    Value::Number(number) => number.as_f64(),
    Value::String(text) => text.trim().replace(',', "").parse().ok(),
    _ => None,
  }
}

/// Picks a failure message out of an application-level error body, if there is one.
pub fn application_error(body: &Value) -> Option<String> {
  if let Some(message) = body.get("error") {
    return Some(match message {
      Value::String(text) => text.clone(),
      other => other.to_string(),
    });
  }
  let failed = body.get("success").and_then(Value::as_bool) == Some(false)
    || body.get("status").and_then(Value::as_str) == Some("error");
  if failed {
    let message = body
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or("request failed")
      .to_string();
    return Some(message);
  }
  None
}

/// HTTP client for the action-tagged sheets endpoint.
pub struct HttpGateway {
  client: Client,
  remote_url: String,
  api_key: String,
  report_url: Option<String>,
}

impl HttpGateway {
  pub fn new(config: &SyncConfig) -> Result<Self, GatewayError> {
    let client = Client::builder().timeout(config.request_timeout).build()?;
    Ok(Self {
      client,
      remote_url: config.remote_url.clone(),
      api_key: config.api_key.clone(),
      report_url: config.report_url.clone(),
    })
  }

  /// Forwards a prompt to the report proxy and returns its JSON body untouched.
  pub async fn generate_report(&self, prompt: &str) -> Result<Value, GatewayError> {
    let url = self
      .report_url
      .as_deref()
      .ok_or(GatewayError::NotConfigured("report endpoint"))?;
    let response = self
      .client
      .post(url)
      .header("x-api-key", &self.api_key)
      .json(&json!({ "prompt": prompt }))
      .send()
      .await?;
    read_response("generateReport", response).await
  }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
  async fn send(&self, request: RemoteRequest) -> Result<Value, GatewayError> {
    let action = request.action();
    log::debug!("remote {action}");
    let builder = if request.is_read() {
      self
        .client
        .get(&self.remote_url)
        .query(&[("apiKey", self.api_key.as_str()), ("action", action)])
    } else {
      self.client.post(&self.remote_url).json(&request.to_body(&self.api_key))
    };
    let response = builder.header("x-api-key", &self.api_key).send().await?;
    read_response(action, response).await
  }
}

async fn read_response(action: &'static str, response: reqwest::Response) -> Result<Value, GatewayError> {
  let status = response.status();
  let text = response.text().await?;
  let body = if text.trim().is_empty() {
    Value::Null
  } else {
    match serde_json::from_str::<Value>(&text) {
      Ok(value) => value,
      Err(_) => Value::String(text),
    }
  };

  if !status.is_success() {
    let message = application_error(&body).unwrap_or_else(|| match &body {
      Value::String(text) => text.clone(),
      Value::Null => status.to_string(),
      other => other.to_string(),
    });
    return Err(GatewayError::Application {
      action,
      status: status.as_u16(),
      message,
    });
  }

  if let Some(message) = application_error(&body) {
    return Err(GatewayError::Application {
      action,
      status: status.as_u16(),
      message,
    });
  }
  Ok(body)
}
