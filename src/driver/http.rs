use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, Method};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::DriverSettings;
use crate::driver::{Driver, Outcome};
use crate::error::{FlowcheckError, Result};
use crate::flow::model::ASSERTION_VERBS;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];
const REQUEST_VERBS: &[&str] = &["send", "call", "request"];
/// Words between the assertion verb and what is asserted, as in
/// "Should return 201".
const FILLER_WORDS: &[&str] = &["return", "returns", "receive", "get", "be"];

/// `POST /api/projects {"name":"demo"}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub path: String,
  pub body: Option<String>,
}

impl Request {
  pub fn parse(description: &str) -> Option<Self> {
    let text = strip_leading_word(description.trim(), REQUEST_VERBS);
    let (method, rest) = text.split_once(char::is_whitespace)?;
    let method = method.to_uppercase();
    if !METHODS.contains(&method.as_str()) {
      return None;
    }

    let rest = rest.trim();
    let (path, body) = match rest.split_once(char::is_whitespace) {
      Some((path, body)) => (path, Some(body.trim().to_string())),
      None => (rest, None),
    };
    if !(path.starts_with('/') || path.starts_with("http://") || path.starts_with("https://")) {
      return None;
    }

    Some(Self {
      method,
      path: path.to_string(),
      body: body.filter(|b| !b.is_empty()),
    })
  }
}

impl std::fmt::Display for Request {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.path)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub body: String,
}

/// What an assertion step expects of the last response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
  Status(u16),
  BodyContains(String),
}

impl Expectation {
  pub fn parse(description: &str) -> Option<Self> {
    let text = strip_leading_word(description.trim(), ASSERTION_VERBS);
    let text = strip_leading_word(text, FILLER_WORDS);
    let lower = text.to_lowercase();

    for prefix in ["response body contains", "body contains", "response contains"] {
      if lower.starts_with(prefix) {
        let needle = text.get(prefix.len()..).unwrap_or_default().trim();
        let needle = needle
          .strip_prefix('"')
          .and_then(|n| n.strip_suffix('"'))
          .unwrap_or(needle);
        if needle.is_empty() {
          return None;
        }
        return Some(Expectation::BodyContains(needle.to_string()));
      }
    }

    let mut code = lower.as_str();
    for prefix in ["response status", "status code", "status", "http"] {
      if let Some(rest) = code.strip_prefix(prefix) {
        code = rest.trim_start();
        break;
      }
    }
    code
      .split_whitespace()
      .next()
      .and_then(|c| c.parse::<u16>().ok())
      .filter(|c| (100..600).contains(c))
      .map(Expectation::Status)
  }

  pub fn check(&self, response: &Response) -> Outcome {
    match self {
      Expectation::Status(code) if response.status == *code => Outcome::Pass,
      Expectation::Status(code) => {
        Outcome::fail(format!("expected status {code}, got {}", response.status))
      }
      Expectation::BodyContains(needle) if response.body.contains(needle.as_str()) => {
        Outcome::Pass
      }
      Expectation::BodyContains(needle) => Outcome::fail(format!(
        "response body does not contain `{needle}`: {}",
        truncate(&response.body, 200)
      )),
    }
  }
}

/// Backend flows over plain HTTP. Assertions check the last response.
pub struct HttpDriver {
  client: Client,
  base_url: String,
  headers: Vec<(String, String)>,
  timeout: Duration,
  last: Mutex<Option<Response>>,
}

impl HttpDriver {
  pub fn new(settings: &DriverSettings) -> Result<Self> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let client = Client::builder()
      .timeout(timeout)
      .connect_timeout(timeout.min(Duration::from_secs(10)))
      .user_agent(concat!("flowcheck/", env!("CARGO_PKG_VERSION")))
      .build()?;

    let headers = settings
      .headers
      .iter()
      .map(|h| {
        h.split_once(':')
          .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
          .ok_or_else(|| FlowcheckError::Config(format!("bad header `{h}`")))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      client,
      base_url: settings.base_url.clone().unwrap_or_default(),
      headers,
      timeout,
      last: Mutex::new(None),
    })
  }

  fn url(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
      path.to_string()
    } else {
      format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let url = self.url(&request.path);
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FlowcheckError::Driver(format!("bad method {}: {e}", request.method)))?;

    let mut builder = self.client.request(method, &url);
    for (name, value) in &self.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => builder.json(&json),
        Err(_) => builder.body(body.clone()),
      };
    }

    info!("{} {url}", request.method);
    let response = builder.send().await.map_err(|e| self.http_error(request, e))?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| self.http_error(request, e))?;

    debug!("{request} -> {status} ({} bytes)", body.len());
    Ok(Response { status, body })
  }

  fn http_error(&self, request: &Request, e: reqwest::Error) -> FlowcheckError {
    if e.is_timeout() {
      FlowcheckError::Timeout(format!("{request} exceeded {}s", self.timeout.as_secs()))
    } else {
      e.into()
    }
  }

  /// Driver calls arrive on the blocking pool, which may re-enter the runtime.
  fn send_blocking(&self, request: &Request) -> Result<Response> {
    let handle = Handle::try_current()
      .map_err(|e| FlowcheckError::Driver(format!("no async runtime for HTTP: {e}")))?;
    handle.block_on(self.send(request))
  }
}

impl Driver for HttpDriver {
  fn perform_action(&self, description: &str) -> Outcome {
    let Some(request) = Request::parse(description) else {
      return Outcome::fail(format!("not an HTTP request: {description}"));
    };

    match self.send_blocking(&request) {
      Ok(response) => {
        *self.last.lock().unwrap() = Some(response);
        Outcome::Pass
      }
      Err(FlowcheckError::Timeout(_)) => Outcome::Timeout,
      Err(e) => Outcome::fail(e.to_string()),
    }
  }

  fn check_assertion(&self, description: &str) -> Outcome {
    let Some(expectation) = Expectation::parse(description) else {
      return Outcome::fail(format!("unrecognized HTTP assertion: {description}"));
    };

    match self.last.lock().unwrap().as_ref() {
      Some(response) => expectation.check(response),
      None => Outcome::fail("no request has been sent yet"),
    }
  }
}

fn strip_leading_word<'a>(text: &'a str, words: &[&str]) -> &'a str {
  match text.split_once(char::is_whitespace) {
    Some((first, rest))
      if words.contains(&first.trim_end_matches(':').to_lowercase().as_str()) =>
    {
      rest.trim_start()
    }
    _ => text,
  }
}

fn truncate(text: &str, max_chars: usize) -> String {
  match text.char_indices().nth(max_chars) {
    Some((idx, _)) => format!("{}...", &text[..idx]),
    None => text.to_string(),
  }
}
