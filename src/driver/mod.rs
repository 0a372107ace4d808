pub mod agent;
pub mod claude;
pub mod http;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Config, DriverKind};
use crate::error::Result;

/// What a driver reports for a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  Pass,
  Fail { reason: String },
  Timeout,
}

impl Outcome {
  pub fn fail(reason: impl Into<String>) -> Self {
    Outcome::Fail {
      reason: reason.into(),
    }
  }
}

impl std::fmt::Display for Outcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Outcome::Pass => write!(f, "pass"),
      Outcome::Fail { reason } => write!(f, "fail: {reason}"),
      Outcome::Timeout => write!(f, "timeout"),
    }
  }
}

/// The external collaborator that turns step descriptions into real
/// browser or HTTP activity. Calls may block on I/O.
pub trait Driver: Send + Sync {
  fn perform_action(&self, description: &str) -> Outcome;
  fn check_assertion(&self, description: &str) -> Outcome;
}

/// Builds a fresh driver. Each flow gets its own instance so concurrent
/// flows share no driver state.
pub fn build(config: &Config) -> Result<Arc<dyn Driver>> {
  let driver: Arc<dyn Driver> = match config.driver.kind {
    DriverKind::Http => Arc::new(http::HttpDriver::new(&config.driver)?),
    DriverKind::Agent => Arc::new(agent::AgentDriver::claude(
      &config.driver,
      Config::repo_path(),
    )),
  };
  Ok(driver)
}
