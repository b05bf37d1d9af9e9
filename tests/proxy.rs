mod common;

use serde_json::json;
use tiny_http::Method;

use common::upstream::upstream;
use fintrack_sync::proxy::{Proxy, ProxyRequest};
use fintrack_sync::ProxyConfig;

fn sheets_proxy(base: &str) -> Proxy {
  Proxy::new(ProxyConfig {
    sheets_url: Some(format!("{base}/exec")),
    sheets_api_key: Some("server-key".to_string()),
    ..ProxyConfig::default()
  })
  .unwrap()
}

fn report_proxy(base: &str) -> Proxy {
  Proxy::new(ProxyConfig {
    gemini_api_key: Some("g-key".to_string()),
    gemini_api_base: base.to_string(),
    ..ProxyConfig::default()
  })
  .unwrap()
}

fn report_request() -> ProxyRequest {
  ProxyRequest::new(Method::Post, "/api/report").with_json(&json!({ "prompt": "Summarise March" }))
}

#[test]
fn sheets_get_forwards_action_with_server_key() {
  let rows = json!({ "data": [{ "uuid": "u-1", "amount": 5 }] });
  let (base, seen) = upstream(vec![(200, rows.clone())]);

  let response = sheets_proxy(&base).route(&ProxyRequest::new(Method::Get, "/api/sheets?action=getTransactions"));
  assert_eq!(response.status, 200);
  assert_eq!(response.body, rows);

  let request = seen.recv().unwrap();
  assert_eq!(request.method, "GET");
  assert!(request.url.starts_with("/exec?"));
  assert!(request.url.contains("apiKey=server-key"));
  assert!(request.url.contains("action=getTransactions"));
}

#[test]
fn sheets_post_wraps_body_and_relays_status() {
  let (base, seen) = upstream(vec![(409, json!({ "error": "duplicate" }))]);
  let body = json!({ "action": "setBudget", "data": { "monthYear": "2024-03", "amount": 5000 } });

  let response = sheets_proxy(&base).route(&ProxyRequest::new(Method::Post, "/api/sheets").with_json(&body));
  assert_eq!(response.status, 409);
  assert_eq!(response.body["error"], "duplicate");

  let request = seen.recv().unwrap();
  assert_eq!(request.method, "POST");
  assert_eq!(request.body["apiKey"], "server-key");
  assert_eq!(request.body["action"], "setBudget");
  assert_eq!(request.body["data"]["amount"], 5000);
}

#[test]
fn report_returns_first_candidate_text() {
  let reply = json!({
    "candidates": [{ "content": { "parts": [{ "text": "{\"summary\":\"steady\"}" }] } }]
  });
  let (base, seen) = upstream(vec![(200, reply)]);

  let response = report_proxy(&base).route(&report_request());
  assert_eq!(response.status, 200);
  assert_eq!(response.body, json!({ "text": "{\"summary\":\"steady\"}" }));

  let request = seen.recv().unwrap();
  assert_eq!(request.url, "/models/gemini-1.5-flash:generateContent?key=g-key");
  assert_eq!(request.body["contents"][0]["parts"][0]["text"], "Summarise March");
  assert_eq!(request.body["generationConfig"]["maxOutputTokens"], 8192);
}

#[test]
fn report_maps_upstream_failures() {
  let (base, _seen) = upstream(vec![
    (429, json!({ "error": { "message": "quota" } })),
    (500, json!({ "error": { "message": "boom" } })),
    (403, json!({ "error": { "message": "key revoked" } })),
  ]);
  let proxy = report_proxy(&base);

  let limited = proxy.route(&report_request());
  assert_eq!(limited.status, 429);
  assert_eq!(limited.body["error"], "quota");
  assert_eq!(proxy.route(&report_request()).status, 502);
  assert_eq!(proxy.route(&report_request()).status, 403);
}

#[test]
fn unreachable_report_service_is_503() {
  let proxy = report_proxy("http://127.0.0.1:1");
  assert_eq!(proxy.route(&report_request()).status, 503);
}
