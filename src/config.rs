use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FlowcheckError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub settings: Settings,
  #[serde(default)]
  pub driver: DriverSettings,
  /// Per-flow coverage globs and driver overrides.
  #[serde(default)]
  pub flows: Vec<FlowRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
  #[serde(default = "default_flows_dir")]
  pub flows_dir: PathBuf,
  #[serde(default = "default_step_timeout")]
  pub step_timeout_secs: u64,
  #[serde(default = "default_parallel_flows")]
  pub parallel_flows: usize,
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  #[serde(default = "default_base_branch")]
  pub base_branch: String,
  #[serde(default = "default_state_file")]
  pub state_file: PathBuf,
  #[serde(default = "default_results_dir")]
  pub results_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
  /// Plain HTTP requests against `base_url`.
  #[serde(alias = "curl")]
  Http,
  /// Browser work through a Claude Code session.
  Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
  #[serde(default = "default_driver_kind")]
  pub kind: DriverKind,
  #[serde(default)]
  pub base_url: Option<String>,
  /// Extra `Name: value` headers sent with every HTTP request.
  #[serde(default)]
  pub headers: Vec<String>,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
  #[serde(default = "default_agent_bin")]
  pub agent_bin: String,
  #[serde(default = "default_agent_model")]
  pub agent_model: String,
  #[serde(default = "default_agent_tools")]
  pub agent_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowRule {
  pub flow: String,
  /// Globs of source paths the flow exercises.
  #[serde(default)]
  pub paths: Vec<String>,
  #[serde(default)]
  pub driver: Option<DriverKind>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      flows_dir: default_flows_dir(),
      step_timeout_secs: default_step_timeout(),
      parallel_flows: default_parallel_flows(),
      poll_interval_secs: default_poll_interval(),
      base_branch: default_base_branch(),
      state_file: default_state_file(),
      results_dir: default_results_dir(),
    }
  }
}

impl Default for DriverSettings {
  fn default() -> Self {
    Self {
      kind: default_driver_kind(),
      base_url: None,
      headers: Vec::new(),
      request_timeout_secs: default_request_timeout(),
      agent_bin: default_agent_bin(),
      agent_model: default_agent_model(),
      agent_tools: default_agent_tools(),
    }
  }
}

fn default_flows_dir() -> PathBuf {
  PathBuf::from("flows")
}
fn default_step_timeout() -> u64 {
  180
}
fn default_parallel_flows() -> usize {
  1
}
fn default_poll_interval() -> u64 {
  30
}
fn default_base_branch() -> String {
  "main".to_string()
}
fn default_state_file() -> PathBuf {
  PathBuf::from(".flowcheck").join("state.yaml")
}
fn default_results_dir() -> PathBuf {
  PathBuf::from(".flowcheck").join("results")
}
fn default_driver_kind() -> DriverKind {
  DriverKind::Agent
}
fn default_agent_bin() -> String {
  "claude".to_string()
}
fn default_request_timeout() -> u64 {
  120
}
fn default_agent_model() -> String {
  "sonnet".to_string()
}
fn default_agent_tools() -> Vec<String> {
  vec!["mcp__playwright".into(), "Read".into(), "Glob".into(), "Grep".into()]
}

impl Config {
  /// Loads `path`, falling back to defaults when the file does not exist.
  pub fn load(path: &Path) -> Result<Self> {
    if !path.exists() {
      info!("no config at {}, using defaults", path.display());
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// Like `load`, but a missing file is an error.
  pub fn load_required(path: &Path) -> Result<Self> {
    if !path.exists() {
      return Err(FlowcheckError::ConfigNotFound(path.to_path_buf()));
    }
    Self::load(path)
  }

  pub fn validate(&self) -> Result<()> {
    let s = &self.settings;
    if s.step_timeout_secs == 0 || s.poll_interval_secs == 0 {
      return Err(FlowcheckError::Config("timeouts and intervals must be positive".into()));
    }
    if s.parallel_flows == 0 {
      return Err(FlowcheckError::Config("parallel_flows must be at least 1".into()));
    }
    if self.driver.request_timeout_secs == 0 {
      return Err(FlowcheckError::Config("request_timeout_secs must be positive".into()));
    }

    // A step timeout abandons the driver call but cannot stop it, so the
    // driver must give up first.
    if self.driver.request_timeout_secs >= s.step_timeout_secs {
      return Err(FlowcheckError::Config(format!(
        "request_timeout_secs ({}) must be below step_timeout_secs ({})",
        self.driver.request_timeout_secs, s.step_timeout_secs
      )));
    }

    let uses_http = self.driver.kind == DriverKind::Http
      || self.flows.iter().any(|r| r.driver == Some(DriverKind::Http));
    if uses_http && self.driver.base_url.as_deref().unwrap_or_default().is_empty() {
      return Err(FlowcheckError::Config("http driver requires driver.base_url".into()));
    }
    for header in &self.driver.headers {
      if !header.split_once(':').is_some_and(|(name, _)| !name.trim().is_empty()) {
        return Err(FlowcheckError::Config(format!(
          "header `{header}` is not of the form `Name: value`"
        )));
      }
    }

    for (i, rule) in self.flows.iter().enumerate() {
      if self.flows[..i].iter().any(|r| r.flow == rule.flow) {
        return Err(FlowcheckError::Config(format!(
          "flow `{}` configured more than once",
          rule.flow
        )));
      }
      for pattern in &rule.paths {
        glob::Pattern::new(pattern)?;
      }
    }
    Ok(())
  }

  pub fn rule_for(&self, flow: &str) -> Option<&FlowRule> {
    self.flows.iter().find(|r| r.flow == flow)
  }

  /// Config for running `flow`, with any per-flow driver override applied.
  pub fn for_flow(&self, flow: &str) -> Config {
    let mut config = self.clone();
    if let Some(kind) = self.rule_for(flow).and_then(|r| r.driver) {
      config.driver.kind = kind;
    }
    config
  }

  pub fn repo_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
  }
}
