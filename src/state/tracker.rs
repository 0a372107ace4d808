use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{FlowcheckError, Result};
use crate::execute::result::{RunStatus, ValidationResult};

pub type SharedState = Arc<Mutex<StateTracker>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
  #[serde(default)]
  pub flows: BTreeMap<String, FlowState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
  pub status: FlowStatus,
  pub run_id: Option<Uuid>,
  pub failed_step: Option<String>,
  pub error: Option<String>,
  pub commit: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub runs: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
  Pending,
  Running,
  Passed,
  Failed,
  /// The flow could not be executed at all (e.g. no matching branch).
  Error,
}

impl FlowStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, FlowStatus::Passed | FlowStatus::Failed | FlowStatus::Error)
  }

  pub fn is_blocking(&self) -> bool {
    matches!(self, FlowStatus::Failed | FlowStatus::Error)
  }
}

impl From<RunStatus> for FlowStatus {
  fn from(status: RunStatus) -> Self {
    match status {
      RunStatus::NotStarted => FlowStatus::Pending,
      RunStatus::Running => FlowStatus::Running,
      RunStatus::Passed => FlowStatus::Passed,
      RunStatus::Failed => FlowStatus::Failed,
    }
  }
}

pub struct StateTracker {
  path: PathBuf,
  state: StateFile,
}

impl StateTracker {
  pub fn load(path: &Path) -> Result<Self> {
    let state = if path.exists() {
      let content = std::fs::read_to_string(path)?;
      if content.trim().is_empty() {
        StateFile::default()
      } else {
        serde_yaml::from_str(&content)?
      }
    } else {
      StateFile::default()
    };

    Ok(Self {
      path: path.to_path_buf(),
      state,
    })
  }

  /// Writes the state file under an exclusive lock so two `flowcheck`
  /// processes cannot interleave writes.
  pub fn save(&self) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    let content = serde_yaml::to_string(&self.state)?;

    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(false)
      .open(&self.path)?;
    file
      .lock_exclusive()
      .map_err(|e| FlowcheckError::State(format!("lock {}: {e}", self.path.display())))?;
    let written = file.set_len(0).and_then(|_| {
      use std::io::Write;
      (&file).write_all(content.as_bytes())
    });
    let _ = FileExt::unlock(&file);
    written?;
    Ok(())
  }

  pub fn into_shared(self) -> SharedState {
    Arc::new(Mutex::new(self))
  }

  pub fn get(&self, flow: &str) -> Option<&FlowState> {
    self.state.flows.get(flow)
  }

  fn entry(&mut self, flow: &str) -> &mut FlowState {
    self
      .state
      .flows
      .entry(flow.to_string())
      .or_insert_with(|| FlowState {
        status: FlowStatus::Pending,
        run_id: None,
        failed_step: None,
        error: None,
        commit: None,
        started_at: None,
        completed_at: None,
        runs: 0,
      })
  }

  pub fn set_running(&mut self, flow: &str, commit: Option<&str>) -> Result<()> {
    let entry = self.entry(flow);
    info!("{flow}: {:?} -> Running", entry.status);
    entry.status = FlowStatus::Running;
    entry.started_at = Some(Utc::now());
    entry.completed_at = None;
    entry.failed_step = None;
    entry.error = None;
    entry.commit = commit.map(str::to_string);
    entry.runs += 1;
    self.save()
  }

  pub fn record_result(&mut self, result: &ValidationResult) -> Result<()> {
    let entry = self.entry(&result.flow);
    let status = FlowStatus::from(result.status);
    info!("{}: {:?} -> {status:?}", result.flow, entry.status);

    entry.status = status;
    entry.run_id = Some(result.run_id);
    entry.failed_step = result
      .failed_step()
      .map(|(i, report)| format!("{}. {} ({})", i + 1, report.description, report.outcome));
    entry.completed_at = result.finished_at.or_else(|| Some(Utc::now()));
    self.save()
  }

  pub fn set_error(&mut self, flow: &str, error: &str) -> Result<()> {
    let entry = self.entry(flow);
    entry.status = FlowStatus::Error;
    entry.error = Some(error.to_string());
    entry.completed_at = Some(Utc::now());
    self.save()
  }

  pub fn blocking_flows(&self) -> Vec<&str> {
    self
      .state
      .flows
      .iter()
      .filter(|(_, s)| s.status.is_blocking())
      .map(|(name, _)| name.as_str())
      .collect()
  }

  pub fn summary(&self) -> StateSummary {
    let mut summary = StateSummary::default();
    for state in self.state.flows.values() {
      match state.status {
        FlowStatus::Pending => summary.pending += 1,
        FlowStatus::Running => summary.running += 1,
        FlowStatus::Passed => summary.passed += 1,
        FlowStatus::Failed => summary.failed += 1,
        FlowStatus::Error => summary.errors += 1,
      }
    }
    summary
  }

  pub fn all_flows(&self) -> &BTreeMap<String, FlowState> {
    &self.state.flows
  }
}

#[derive(Debug, Default)]
pub struct StateSummary {
  pub pending: usize,
  pub running: usize,
  pub passed: usize,
  pub failed: usize,
  pub errors: usize,
}

impl std::fmt::Display for StateSummary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "pending={}, running={}, passed={}, failed={}, errors={}",
      self.pending, self.running, self.passed, self.failed, self.errors
    )
  }
}
