use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::Outcome;
use crate::flow::model::StepKind;
use crate::resolve::{ResolvedPath, UntakenBranch};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  NotStarted,
  Running,
  Passed,
  Failed,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunStatus::Passed | RunStatus::Failed)
  }
}

impl std::fmt::Display for RunStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RunStatus::NotStarted => "not started",
      RunStatus::Running => "running",
      RunStatus::Passed => "passed",
      RunStatus::Failed => "failed",
    };
    write!(f, "{s}")
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
  Pass,
  Fail { reason: String },
  Timeout,
  Skipped,
}

impl StepOutcome {
  pub fn is_pass(&self) -> bool {
    matches!(self, StepOutcome::Pass)
  }
}

impl From<Outcome> for StepOutcome {
  fn from(outcome: Outcome) -> Self {
    match outcome {
      Outcome::Pass => StepOutcome::Pass,
      Outcome::Fail { reason } => StepOutcome::Fail { reason },
      Outcome::Timeout => StepOutcome::Timeout,
    }
  }
}

impl std::fmt::Display for StepOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StepOutcome::Pass => write!(f, "pass"),
      StepOutcome::Fail { reason } => write!(f, "fail: {reason}"),
      StepOutcome::Timeout => write!(f, "timeout"),
      StepOutcome::Skipped => write!(f, "skipped"),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
  pub description: String,
  pub kind: StepKind,
  #[serde(flatten)]
  pub outcome: StepOutcome,
}

/// Outcome of executing one flow's resolved path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
  pub run_id: Uuid,
  pub flow: String,
  pub status: RunStatus,
  pub steps: Vec<StepReport>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub untaken: Vec<UntakenBranch>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl ValidationResult {
  /// A NotStarted result with every step of the path marked Skipped.
  pub fn new(path: &ResolvedPath<'_>) -> Self {
    Self {
      run_id: Uuid::new_v4(),
      flow: path.flow.name.clone(),
      status: RunStatus::NotStarted,
      steps: path
        .steps
        .iter()
        .map(|step| StepReport {
          description: step.description.clone(),
          kind: step.kind,
          outcome: StepOutcome::Skipped,
        })
        .collect(),
      untaken: path.untaken.clone(),
      started_at: None,
      finished_at: None,
    }
  }

  pub fn begin(&mut self) {
    if self.status == RunStatus::NotStarted {
      self.status = RunStatus::Running;
      self.started_at = Some(Utc::now());
    }
  }

  /// Records the outcome of step `index`. The first non-pass outcome is
  /// terminal; later calls are ignored.
  pub fn record(&mut self, index: usize, outcome: StepOutcome) {
    if self.status != RunStatus::Running {
      return;
    }
    let Some(report) = self.steps.get_mut(index) else {
      return;
    };

    let failed = !outcome.is_pass();
    report.outcome = outcome;
    if failed {
      self.status = RunStatus::Failed;
      self.finished_at = Some(Utc::now());
    }
  }

  pub fn finish(&mut self) {
    if self.status == RunStatus::Running {
      self.status = RunStatus::Passed;
      self.finished_at = Some(Utc::now());
    }
  }

  pub fn passed(&self) -> bool {
    self.status == RunStatus::Passed
  }

  pub fn failed_step(&self) -> Option<(usize, &StepReport)> {
    self
      .steps
      .iter()
      .enumerate()
      .find(|(_, r)| matches!(r.outcome, StepOutcome::Fail { .. } | StepOutcome::Timeout))
  }

  pub fn count(&self, wanted: fn(&StepOutcome) -> bool) -> usize {
    self.steps.iter().filter(|r| wanted(&r.outcome)).count()
  }
}

impl std::fmt::Display for ValidationResult {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "{}: {}", self.flow, self.status)?;
    for (i, report) in self.steps.iter().enumerate() {
      writeln!(
        f,
        "  {:>2}. [{}] {} ({})",
        i + 1,
        report.outcome,
        report.description,
        report.kind
      )?;
    }
    for branch in &self.untaken {
      writeln!(f, "      [skipped] {} / {}", branch.step, branch.label)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flow::parser::parse_flow;
  use crate::flow::Step;
  use crate::resolve::resolve;

  fn fresh(text: &str) -> ValidationResult {
    let flow = parse_flow(text).unwrap();
    let mut first = |s: &Step| s.branches.first().map(|b| b.label.clone());
    let path = resolve(&flow, &mut first).unwrap();
    ValidationResult::new(&path)
  }

  #[test]
  fn test_state_transitions() {
    let mut result = fresh("Flow: T\n  → a\n  → b\n");
    assert_eq!(result.status, RunStatus::NotStarted);
    assert!(result.steps.iter().all(|r| r.outcome == StepOutcome::Skipped));

    result.begin();
    assert_eq!(result.status, RunStatus::Running);
    assert!(result.started_at.is_some());

    result.record(0, StepOutcome::Pass);
    result.record(1, StepOutcome::Pass);
    result.finish();
    assert_eq!(result.status, RunStatus::Passed);
    assert!(result.status.is_terminal());
    assert!(result.passed());
  }

  #[test]
  fn test_failure_is_terminal() {
    let mut result = fresh("Flow: T\n  → a\n  → b\n  → c\n");
    result.begin();
    result.record(0, StepOutcome::Fail {
      reason: "boom".into(),
    });
    result.record(1, StepOutcome::Pass);
    result.finish();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.steps[1].outcome, StepOutcome::Skipped);
    assert_eq!(result.failed_step().map(|(i, _)| i), Some(0));
    assert_eq!(result.count(|o| *o == StepOutcome::Skipped), 2);
  }

  #[test]
  fn test_record_before_begin_is_ignored() {
    let mut result = fresh("Flow: T\n  → a\n");
    result.record(0, StepOutcome::Pass);
    result.finish();
    assert_eq!(result.status, RunStatus::NotStarted);
  }

  #[test]
  fn test_yaml_shape() {
    let mut result = fresh("Flow: T\n  → Click\n");
    result.begin();
    result.record(0, StepOutcome::Timeout);
    let yaml = serde_yaml::to_string(&result).unwrap();
    assert!(yaml.contains("status: failed"));
    assert!(yaml.contains("outcome: timeout"));
    assert!(yaml.contains("kind: action"));
  }
}
