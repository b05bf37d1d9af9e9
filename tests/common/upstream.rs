use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tiny_http::{Header, Response, Server, StatusCode};

pub struct Seen {
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Value,
}

impl Seen {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

pub struct Canned {
  pub status: u16,
  pub body: Value,
  pub delay: Option<Duration>,
}

impl Canned {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body, delay: None }
  }

  pub fn after(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

/// Serves the canned responses in order on a random local port, reporting each request it saw.
pub fn upstream(responses: Vec<(u16, Value)>) -> (String, Receiver<Seen>) {
  upstream_with(responses.into_iter().map(|(status, body)| Canned::new(status, body)).collect())
}

pub fn upstream_with(responses: Vec<Canned>) -> (String, Receiver<Seen>) {
  let server = Server::http("127.0.0.1:0").unwrap();
  let addr = server.server_addr().to_ip().unwrap();
  let (sender, receiver) = mpsc::channel();
  thread::spawn(move || {
    for canned in responses {
      let Ok(mut request) = server.recv() else {
        return;
      };
      let mut raw = String::new();
      let _ = request.as_reader().read_to_string(&mut raw);
      let _ = sender.send(Seen {
        method: request.method().to_string(),
        url: request.url().to_string(),
        headers: request
          .headers()
          .iter()
          .map(|header| (header.field.as_str().as_str().to_string(), header.value.as_str().to_string()))
          .collect(),
        body: serde_json::from_str(&raw).unwrap_or(Value::Null),
      });
      if let Some(delay) = canned.delay {
        thread::sleep(delay);
      }
      let response = Response::from_string(canned.body.to_string())
        .with_status_code(StatusCode(canned.status))
        .with_header(Header::from_bytes("Content-Type", "application/json").unwrap());
      let _ = request.respond(response);
    }
  });
  (format!("http://{addr}"), receiver)
}
