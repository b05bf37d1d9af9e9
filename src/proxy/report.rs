use reqwest::blocking::Client;
use serde_json::{json, Value};
use tiny_http::Method;

use super::{authorize, relay_body, ProxyRequest, ProxyResponse};
use crate::config::ProxyConfig;

pub const TEMPERATURE: f64 = 0.7;
pub const TOP_K: u32 = 40;
pub const TOP_P: f64 = 0.95;
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Request body for `models/{model}:generateContent`.
pub fn generation_request(prompt: &str) -> Value {
  json!({
    "contents": [{ "parts": [{ "text": prompt }] }],
    "generationConfig": {
      "responseMimeType": "application/json",
      "temperature": TEMPERATURE,
      "topK": TOP_K,
      "topP": TOP_P,
      "maxOutputTokens": MAX_OUTPUT_TOKENS
    }
  })
}

/// Status the client sees for a failed upstream call.
pub fn map_upstream_status(status: u16) -> u16 {
  match status {
    400 => 400,
    401 | 403 => 403,
    429 => 429,
    _ => 502,
  }
}

/// Text of the first candidate's first part, if any.
pub fn first_candidate_text(body: &Value) -> Option<String> {
  body
    .get("candidates")?
    .get(0)?
    .get("content")?
    .get("parts")?
    .as_array()?
    .iter()
    .find_map(|part| part.get("text").and_then(Value::as_str))
    .map(str::to_string)
}

fn upstream_message(body: &Value) -> String {
  body
    .get("error")
    .and_then(|error| error.get("message").or(Some(error)))
    .and_then(Value::as_str)
    .unwrap_or("Report service error")
    .to_string()
}

pub fn handle(request: &ProxyRequest, config: &ProxyConfig, client: &Client) -> ProxyResponse {
  if let Err(rejected) = authorize(request, config) {
    return rejected;
  }
  if request.method != Method::Post {
    return ProxyResponse::error(405, "Method not allowed");
  }
  let prompt = request
    .json_body()
    .and_then(|body| body.get("prompt").and_then(Value::as_str).map(str::to_string))
    .filter(|prompt| !prompt.trim().is_empty());
  let Some(prompt) = prompt else {
    return ProxyResponse::error(400, "Missing prompt");
  };
  let Some(api_key) = config.gemini_api_key.as_deref() else {
    log::error!("report proxy called without GEMINI_API_KEY");
    return ProxyResponse::error(500, "Report service is not configured");
  };

  let url = format!(
    "{}/models/{}:generateContent",
    config.gemini_api_base.trim_end_matches('/'),
    config.gemini_model
  );
  let sent = client
    .post(url)
    .query(&[("key", api_key)])
    .json(&generation_request(&prompt))
    .send();

  let response = match sent {
    Ok(response) => response,
    Err(err) if err.is_timeout() => {
      log::warn!("report upstream timed out: {err}");
      return ProxyResponse::error(504, "Report service timed out");
    }
    Err(err) => {
      log::warn!("report upstream unreachable: {err}");
      return ProxyResponse::error(503, "Report service unreachable");
    }
  };

  let status = response.status().as_u16();
  let body = match response.text() {
    Ok(text) => relay_body(text),
    Err(err) => {
      log::warn!("report upstream body unreadable: {err}");
      return ProxyResponse::error(502, "Report response could not be read");
    }
  };

  if !(200..300).contains(&status) {
    let mapped = map_upstream_status(status);
    log::warn!("report upstream returned {status}, answering {mapped}");
    return ProxyResponse::error(mapped, &upstream_message(&body));
  }

  match first_candidate_text(&body) {
    Some(text) => ProxyResponse::json(200, &json!({ "text": text })),
    None => ProxyResponse::error(502, "Report service returned no candidates"),
  }
}
