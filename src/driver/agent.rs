use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use crate::config::DriverSettings;
use crate::driver::claude::{ClaudeCli, Judge};
use crate::driver::{Driver, Outcome};
use crate::error::FlowcheckError;

pub const BROWSER_INSTRUCTIONS: &str = r#"You are validating a web application by hand, one step at a time.
Use the browser tools available to you to carry out the step you are given.
Do not modify any source files.

For an action, "passed" means the action could be performed.
For a check, "passed" means the page really shows what the check describes."#;

/// Drives web flows through an agent with browser tools (for example a
/// Claude Code session with the Playwright MCP server).
pub struct AgentDriver<J> {
  judge: J,
  base_url: Option<String>,
  performed: Mutex<Vec<String>>,
}

impl AgentDriver<ClaudeCli> {
  pub fn claude(settings: &DriverSettings, cwd: PathBuf) -> Self {
    Self::new(settings, ClaudeCli::new(settings, BROWSER_INSTRUCTIONS, cwd))
  }
}

impl<J: Judge> AgentDriver<J> {
  pub fn new(settings: &DriverSettings, judge: J) -> Self {
    Self {
      judge,
      base_url: settings.base_url.clone(),
      performed: Mutex::new(Vec::new()),
    }
  }

  fn prompt(&self, verb: &str, description: &str) -> String {
    let performed = self.performed.lock().unwrap();
    let history = if performed.is_empty() {
      "(none yet)".to_string()
    } else {
      performed
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
    };

    format!(
      r#"## Application
{base_url}

## Steps already performed in this session
{history}

## {verb}
{description}"#,
      base_url = self.base_url.as_deref().unwrap_or("(use the running local app)"),
    )
  }

  fn ask(&self, verb: &str, description: &str) -> Outcome {
    let prompt = self.prompt(verb, description);
    info!("agent {}: {description}", verb.to_lowercase());

    match self.judge.judge(&prompt) {
      Ok(v) if v.passed => Outcome::Pass,
      Ok(v) if v.reason.is_empty() => Outcome::fail("agent reported failure"),
      Ok(v) => Outcome::fail(v.reason),
      Err(FlowcheckError::Timeout(_)) => Outcome::Timeout,
      Err(e) => Outcome::fail(e.to_string()),
    }
  }
}

impl<J: Judge + Send + Sync> Driver for AgentDriver<J> {
  fn perform_action(&self, description: &str) -> Outcome {
    let outcome = self.ask("Action", description);
    if outcome == Outcome::Pass {
      self.performed.lock().unwrap().push(description.to_string());
    }
    outcome
  }

  fn check_assertion(&self, description: &str) -> Outcome {
    self.ask("Check", description)
  }
}
