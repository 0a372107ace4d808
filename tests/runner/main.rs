use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flowcheck::driver::{Driver, Outcome};
use flowcheck::error::{ParseError, ResolutionError};
use flowcheck::execute::{Executor, RunStatus, StepOutcome};
use flowcheck::flow::{parse_document, parse_flow, render, Step, StepKind};
use flowcheck::resolve::{resolve, Fallback, LabelPreference};

const CREATE_PROJECT: &str = "Flow: Create Project
Navigate to home page
  → Click \"Create Project\" button
  → Verify project page appears
";

const SUBMIT: &str = "Flow: Submit Form
  → Fill in the form
  → Submit form
  → If successful:
      → Verify redirect to list
      → Verify new row is shown
  → If error:
      → Verify error message appears
  → Close the dialog
";

/// Replays canned outcomes by step description and records every call.
#[derive(Default)]
struct ReplayDriver {
  outcomes: HashMap<String, Outcome>,
  calls: Mutex<Vec<(StepKind, String)>>,
}

impl ReplayDriver {
  fn with(mut self, description: &str, outcome: Outcome) -> Self {
    self.outcomes.insert(description.to_string(), outcome);
    self
  }

  fn calls(&self) -> Vec<(StepKind, String)> {
    self.calls.lock().unwrap().clone()
  }

  fn answer(&self, kind: StepKind, description: &str) -> Outcome {
    self
      .calls
      .lock()
      .unwrap()
      .push((kind, description.to_string()));
    self
      .outcomes
      .get(description)
      .cloned()
      .unwrap_or(Outcome::Pass)
  }
}

impl Driver for ReplayDriver {
  fn perform_action(&self, description: &str) -> Outcome {
    self.answer(StepKind::Action, description)
  }

  fn check_assertion(&self, description: &str) -> Outcome {
    self.answer(StepKind::Assertion, description)
  }
}

fn first_branch() -> LabelPreference {
  LabelPreference::new(Vec::new(), Fallback::FirstBranch)
}

// --- parsing ---

#[test]
fn linear_flow_yields_steps_in_source_order() {
  let flow = parse_flow(CREATE_PROJECT).unwrap();

  assert_eq!(flow.name, "Create Project");
  let descriptions: Vec<_> = flow.steps.iter().map(|s| s.description.as_str()).collect();
  assert_eq!(
    descriptions,
    vec![
      "Navigate to home page",
      "Click \"Create Project\" button",
      "Verify project page appears",
    ]
  );
  assert_eq!(flow.steps[2].kind, StepKind::Assertion);

  let path = resolve(&flow, &mut first_branch()).unwrap();
  assert_eq!(path.len(), 3);
  assert!(path.untaken.is_empty());
}

#[test]
fn missing_header_is_rejected() {
  let err = parse_flow("  → Click button\n  → Verify page\n").unwrap_err();
  assert!(matches!(err, ParseError::MissingHeader));
}

#[test]
fn parsing_is_idempotent() {
  assert_eq!(parse_flow(SUBMIT).unwrap(), parse_flow(SUBMIT).unwrap());
}

#[test]
fn render_then_parse_round_trips() {
  for text in [CREATE_PROJECT, SUBMIT] {
    let flow = parse_flow(text).unwrap();
    assert_eq!(parse_flow(&render(&flow)).unwrap(), flow);
  }
}

#[test]
fn document_holds_several_flows() {
  let text = format!("# checkout flows\n\n{CREATE_PROJECT}\n{SUBMIT}");
  let flows = parse_document(&text).unwrap();
  assert_eq!(flows.len(), 2);
  assert_eq!(flows[1].name, "Submit Form");
}

// --- branch resolution ---

#[test]
fn reported_branch_is_the_only_one_taken() {
  let flow = parse_flow(SUBMIT).unwrap();
  let mut decider = |step: &Step| -> Option<String> {
    step.branch("If error").map(|b| b.label.clone())
  };

  let path = resolve(&flow, &mut decider).unwrap();
  let descriptions: Vec<_> = path.steps.iter().map(|s| s.description.as_str()).collect();
  assert_eq!(
    descriptions,
    vec![
      "Fill in the form",
      "Submit form",
      "Verify error message appears",
      "Close the dialog",
    ]
  );
  assert_eq!(path.untaken.len(), 1);
  assert_eq!(path.untaken[0].label, "If successful");
}

#[test]
fn first_branch_excludes_siblings() {
  let flow = parse_flow(SUBMIT).unwrap();
  let path = resolve(&flow, &mut first_branch()).unwrap();

  assert!(path
    .steps
    .iter()
    .any(|s| s.description == "Verify new row is shown"));
  assert!(!path
    .steps
    .iter()
    .any(|s| s.description == "Verify error message appears"));
}

#[test]
fn strict_preference_without_match_fails() {
  let flow = parse_flow(SUBMIT).unwrap();
  let mut strict = LabelPreference::new(vec!["If timeout".into()], Fallback::Strict);

  let err = resolve(&flow, &mut strict).unwrap_err();
  let ResolutionError::NoMatchingBranch { step, reported } = err;
  assert_eq!(step, "Submit form");
  assert!(reported.is_none());
}

// --- execution ---

#[tokio::test]
async fn failing_step_short_circuits_the_rest() {
  let flow = parse_flow(CREATE_PROJECT).unwrap();
  let path = resolve(&flow, &mut first_branch()).unwrap();
  let driver = Arc::new(
    ReplayDriver::default().with("Click \"Create Project\" button", Outcome::fail("element not found")),
  );

  let result = Executor::new(driver.clone()).execute(&path).await;

  assert_eq!(result.status, RunStatus::Failed);
  assert_eq!(result.steps[0].outcome, StepOutcome::Pass);
  assert_eq!(
    result.steps[1].outcome,
    StepOutcome::Fail {
      reason: "element not found".into()
    }
  );
  assert_eq!(result.steps[2].outcome, StepOutcome::Skipped);
  assert_eq!(driver.calls().len(), 2);
}

#[tokio::test]
async fn steps_dispatch_by_kind() {
  let flow = parse_flow(SUBMIT).unwrap();
  let path = resolve(&flow, &mut first_branch()).unwrap();
  let driver = Arc::new(ReplayDriver::default());

  let result = Executor::new(driver.clone()).execute(&path).await;

  assert!(result.passed());
  assert_eq!(result.untaken.len(), 1);
  let kinds: Vec<_> = driver.calls().into_iter().map(|(kind, _)| kind).collect();
  assert_eq!(
    kinds,
    vec![
      StepKind::Action,
      StepKind::Action,
      StepKind::Assertion,
      StepKind::Assertion,
      StepKind::Action,
    ]
  );
}

#[tokio::test]
async fn driver_timeout_is_recorded_not_raised() {
  let flow = parse_flow(CREATE_PROJECT).unwrap();
  let path = resolve(&flow, &mut first_branch()).unwrap();
  let driver = Arc::new(ReplayDriver::default().with("Navigate to home page", Outcome::Timeout));

  let result = Executor::new(driver).execute(&path).await;

  assert_eq!(result.status, RunStatus::Failed);
  assert_eq!(result.steps[0].outcome, StepOutcome::Timeout);
  assert!(result.steps[1..]
    .iter()
    .all(|r| r.outcome == StepOutcome::Skipped));
  assert_eq!(result.failed_step().map(|(i, _)| i), Some(0));
}
