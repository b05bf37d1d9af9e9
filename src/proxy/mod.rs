pub mod report;
pub mod sheets;

use std::io::Cursor;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::config::ProxyConfig;
use crate::error::AppError;

/// Transport-independent view of an incoming request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ProxyRequest {
  pub fn new(method: Method, raw_url: &str) -> Self {
    let (path, query) = match Url::parse(&format!("http://proxy.local{raw_url}")) {
      Ok(url) => (url.path().to_string(), url.query_pairs().into_owned().collect()),
      Err(_) => (raw_url.split('?').next().unwrap_or("").to_string(), Vec::new()),
    };
    Self {
      method,
      path,
      query,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_json(mut self, body: &Value) -> Self {
    self.body = body.to_string().into_bytes();
    self
  }

  fn from_tiny(request: &mut Request) -> std::io::Result<Self> {
    let mut proxy_request = ProxyRequest::new(request.method().clone(), request.url());
    proxy_request.headers = request
      .headers()
      .iter()
      .map(|header| (header.field.as_str().as_str().to_string(), header.value.as_str().to_string()))
      .collect();
    request.as_reader().read_to_end(&mut proxy_request.body)?;
    Ok(proxy_request)
  }

  pub fn query_param(&self, name: &str) -> Option<&str> {
    self
      .query
      .iter()
      .find(|(key, _)| key == name)
      .map(|(_, value)| value.as_str())
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }

  pub fn json_body(&self) -> Option<Value> {
    serde_json::from_slice(&self.body).ok()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
  pub status: u16,
  pub body: Value,
}

impl ProxyResponse {
  pub fn json<T: Serialize>(status: u16, payload: &T) -> Self {
    Self {
      status,
      body: serde_json::to_value(payload).unwrap_or_else(|_| json!({})),
    }
  }

  pub fn error(status: u16, message: &str) -> Self {
    Self {
      status,
      body: json!({ "error": message }),
    }
  }
}

pub struct Proxy {
  config: ProxyConfig,
  client: Client,
}

impl Proxy {
  pub fn new(config: ProxyConfig) -> Result<Self, AppError> {
    let client = Client::builder()
      .timeout(config.upstream_timeout)
      .build()
      .map_err(|err| AppError::new("HTTP_CLIENT", err.to_string()))?;
    Ok(Self { config, client })
  }

  pub fn config(&self) -> &ProxyConfig {
    &self.config
  }

  pub fn route(&self, request: &ProxyRequest) -> ProxyResponse {
    match request.path.trim_end_matches('/') {
      "/api/sheets" => sheets::handle(request, &self.config, &self.client),
      "/api/report" => report::handle(request, &self.config, &self.client),
      _ => ProxyResponse::error(404, "Route not found"),
    }
  }

  /// Blocks the calling thread serving requests one after another.
  pub fn serve(&self) -> Result<(), AppError> {
    let server = Server::http(self.config.bind.as_str())
      .map_err(|err| AppError::new("PROXY_BIND", err.to_string()))?;
    log::info!("proxy listening on {}", self.config.bind);
    for request in server.incoming_requests() {
      self.handle_request(request);
    }
    Ok(())
  }

  fn handle_request(&self, mut request: Request) {
    let response = match ProxyRequest::from_tiny(&mut request) {
      Ok(proxy_request) => {
        let response = self.route(&proxy_request);
        log::info!("{} {} -> {}", proxy_request.method, proxy_request.path, response.status);
        response
      }
      Err(err) => {
        log::warn!("unreadable request body: {err}");
        ProxyResponse::error(400, "Request body could not be read")
      }
    };
    if let Err(err) = request.respond(json_response(&response)) {
      log::warn!("response not delivered: {err}");
    }
  }
}

/// Rejects the call when a client key is configured and the caller did not present it.
pub fn authorize(request: &ProxyRequest, config: &ProxyConfig) -> Result<(), ProxyResponse> {
  let Some(expected) = config.client_key.as_deref() else {
    return Ok(());
  };
  let presented = request
    .header("x-api-key")
    .or_else(|| request.query_param("apiKey"));
  if presented == Some(expected) {
    Ok(())
  } else {
    Err(ProxyResponse::error(401, "Unauthorized"))
  }
}

/// Upstream bodies are relayed as JSON when they parse, otherwise as a JSON string.
pub fn relay_body(text: String) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  match serde_json::from_str::<Value>(&text) {
    Ok(value) => value,
    Err(_) => Value::String(text),
  }
}

fn json_response(response: &ProxyResponse) -> Response<Cursor<Vec<u8>>> {
  let body = serde_json::to_vec(&response.body).unwrap_or_else(|_| b"{}".to_vec());
  let mut http_response = Response::from_data(body).with_status_code(StatusCode(response.status));
  if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
    http_response.add_header(header);
  }
  http_response
}

#[cfg(test)]
mod tests {
  use super::*;

  fn proxy(config: ProxyConfig) -> Proxy {
    Proxy::new(config).unwrap()
  }

  #[test]
  fn query_and_headers_are_parsed() {
    let request = ProxyRequest::new(Method::Get, "/api/sheets?action=getBudgets&apiKey=a%20b")
      .with_header("X-Api-Key", "k");
    assert_eq!(request.path, "/api/sheets");
    assert_eq!(request.query_param("action"), Some("getBudgets"));
    assert_eq!(request.query_param("apiKey"), Some("a b"));
    assert_eq!(request.header("x-api-key"), Some("k"));
  }

  #[test]
  fn unknown_route_is_404() {
    let response = proxy(ProxyConfig::default()).route(&ProxyRequest::new(Method::Get, "/nope"));
    assert_eq!(response.status, 404);
  }

  #[test]
  fn client_key_gate() {
    let config = ProxyConfig {
      client_key: Some("letmein".to_string()),
      ..ProxyConfig::default()
    };
    let anonymous = ProxyRequest::new(Method::Get, "/api/sheets?action=getBudgets");
    assert_eq!(authorize(&anonymous, &config).unwrap_err().status, 401);

    let by_header = anonymous.clone().with_header("x-api-key", "letmein");
    assert!(authorize(&by_header, &config).is_ok());

    let by_query = ProxyRequest::new(Method::Get, "/api/sheets?action=getBudgets&apiKey=letmein");
    assert!(authorize(&by_query, &config).is_ok());

    let wrong = anonymous.with_header("x-api-key", "guess");
    assert_eq!(proxy(config).route(&wrong).status, 401);
  }

  #[test]
  fn no_client_key_means_open() {
    let request = ProxyRequest::new(Method::Get, "/api/sheets");
    assert!(authorize(&request, &ProxyConfig::default()).is_ok());
  }

  #[test]
  fn relay_body_keeps_non_json_text() {
    assert_eq!(relay_body("{\"ok\":true}".to_string()), json!({ "ok": true }));
    assert_eq!(relay_body("<html>".to_string()), json!("<html>"));
    assert_eq!(relay_body(" ".to_string()), Value::Null);
  }
}
