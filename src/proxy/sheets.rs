use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use tiny_http::Method;

use super::{authorize, relay_body, ProxyRequest, ProxyResponse};
use crate::config::ProxyConfig;

/// Forwards sheet reads and writes, adding the server-held sheets key.
pub fn handle(request: &ProxyRequest, config: &ProxyConfig, client: &Client) -> ProxyResponse {
  if let Err(rejected) = authorize(request, config) {
    return rejected;
  }
  let (Some(url), Some(key)) = (config.sheets_url.as_deref(), config.sheets_api_key.as_deref()) else {
    log::error!("sheets proxy called without SHEETS_API_URL/SHEETS_API_KEY");
    return ProxyResponse::error(500, "Sheets API is not configured");
  };

  let upstream = match request.method {
    Method::Get => {
      let Some(action) = request.query_param("action") else {
        return ProxyResponse::error(400, "Missing action");
      };
      client.get(url).query(&[("apiKey", key), ("action", action)])
    }
    Method::Post => {
      let Some(body) = request.json_body() else {
        return ProxyResponse::error(400, "Body must be JSON");
      };
      let Some(action) = body.get("action").and_then(Value::as_str) else {
        return ProxyResponse::error(400, "Missing action");
      };
      let data = body.get("data").cloned().unwrap_or(Value::Null);
      client.post(url).json(&json!({ "apiKey": key, "action": action, "data": data }))
    }
    _ => return ProxyResponse::error(405, "Method not allowed"),
  };

  relay(upstream)
}

fn relay(upstream: RequestBuilder) -> ProxyResponse {
  match upstream.send() {
    Ok(response) => {
      let status = response.status().as_u16();
      match response.text() {
        Ok(text) => ProxyResponse {
          status,
          body: relay_body(text),
        },
        Err(err) => {
          log::warn!("sheets upstream body unreadable: {err}");
          ProxyResponse::error(502, "Upstream response could not be read")
        }
      }
    }
    Err(err) if err.is_timeout() => {
      log::warn!("sheets upstream timed out: {err}");
      ProxyResponse::error(504, "Sheets API timed out")
    }
    Err(err) => {
      log::warn!("sheets upstream unreachable: {err}");
      ProxyResponse::error(502, "Sheets API unreachable")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client() -> Client {
    Client::new()
  }

  fn configured() -> ProxyConfig {
    ProxyConfig {
      sheets_url: Some("http://127.0.0.1:9/exec".to_string()),
      sheets_api_key: Some("server-key".to_string()),
      ..ProxyConfig::default()
    }
  }

  #[test]
  fn missing_configuration_is_500() {
    let request = ProxyRequest::new(Method::Get, "/api/sheets?action=getTransactions");
    let response = handle(&request, &ProxyConfig::default(), &client());
    assert_eq!(response.status, 500);
  }

  #[test]
  fn unsupported_method_is_405() {
    let request = ProxyRequest::new(Method::Delete, "/api/sheets");
    assert_eq!(handle(&request, &configured(), &client()).status, 405);
  }

  #[test]
  fn client_key_checked_before_configuration() {
    let config = ProxyConfig {
      client_key: Some("app".to_string()),
      ..ProxyConfig::default()
    };
    let request = ProxyRequest::new(Method::Get, "/api/sheets?action=getTransactions");
    assert_eq!(handle(&request, &config, &client()).status, 401);
  }

  #[test]
  fn post_requires_action() {
    let request = ProxyRequest::new(Method::Post, "/api/sheets").with_json(&json!({ "data": {} }));
    assert_eq!(handle(&request, &configured(), &client()).status, 400);

    let garbage = ProxyRequest::new(Method::Get, "/api/sheets");
    assert_eq!(handle(&garbage, &configured(), &client()).status, 400);
  }
}
