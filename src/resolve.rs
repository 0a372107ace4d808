use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ResolutionError;
use crate::flow::model::{Flow, Step};

/// Reports which branch of a step matched the observed outcome.
pub trait BranchDecider {
  fn decide(&mut self, step: &Step) -> Option<String>;
}

impl<F> BranchDecider for F
where
  F: FnMut(&Step) -> Option<String>,
{
  fn decide(&mut self, step: &Step) -> Option<String> {
    self(step)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
  /// Take the first branch when no preferred label applies.
  #[default]
  FirstBranch,
  /// Report no decision, which fails resolution.
  Strict,
}

/// Picks the first preferred label a step offers, e.g. `--take "If error"`.
#[derive(Debug, Clone, Default)]
pub struct LabelPreference {
  preferred: Vec<String>,
  fallback: Fallback,
}

impl LabelPreference {
  pub fn new(preferred: Vec<String>, fallback: Fallback) -> Self {
    Self {
      preferred,
      fallback,
    }
  }
}

impl BranchDecider for LabelPreference {
  fn decide(&mut self, step: &Step) -> Option<String> {
    let chosen = self
      .preferred
      .iter()
      .find_map(|label| step.branch(label))
      .or_else(|| match self.fallback {
        Fallback::FirstBranch => step.branches.first(),
        Fallback::Strict => None,
      });
    chosen.map(|b| b.label.clone())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UntakenBranch {
  pub step: String,
  pub label: String,
}

/// The linear sequence of steps one execution exercises.
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
  pub flow: &'a Flow,
  pub steps: Vec<&'a Step>,
  pub untaken: Vec<UntakenBranch>,
}

impl ResolvedPath<'_> {
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

pub fn resolve<'a>(
  flow: &'a Flow,
  decider: &mut impl BranchDecider,
) -> Result<ResolvedPath<'a>, ResolutionError> {
  let mut path = ResolvedPath {
    flow,
    steps: Vec::new(),
    untaken: Vec::new(),
  };
  walk(&flow.steps, decider, &mut path)?;
  debug!(
    "resolved `{}`: {} step(s), {} branch(es) not taken",
    flow.name,
    path.steps.len(),
    path.untaken.len()
  );
  Ok(path)
}

fn walk<'a>(
  steps: &'a [Step],
  decider: &mut impl BranchDecider,
  path: &mut ResolvedPath<'a>,
) -> Result<(), ResolutionError> {
  for step in steps {
    path.steps.push(step);
    if !step.has_branches() {
      continue;
    }

    let reported = decider.decide(step);
    let chosen = reported
      .as_deref()
      .and_then(|label| step.branch(label))
      .ok_or_else(|| ResolutionError::NoMatchingBranch {
        step: step.description.clone(),
        reported: reported.clone(),
      })?;

    for branch in &step.branches {
      if !std::ptr::eq(branch, chosen) {
        path.untaken.push(UntakenBranch {
          step: step.description.clone(),
          label: branch.label.clone(),
        });
      }
    }
    walk(&chosen.steps, decider, path)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flow::parser::parse_flow;

  const SIGNUP: &str = "Flow: Sign up
  → Open the signup page
  → Submit the form
  → If successful:
      → Verify the dashboard loads
      → Verify the welcome banner is shown
  → If error:
      → Verify the error message is shown
  → Log out
";

  fn descriptions(path: &ResolvedPath<'_>) -> Vec<String> {
    path.steps.iter().map(|s| s.description.clone()).collect()
  }

  #[test]
  fn test_takes_reported_branch_only() {
    let flow = parse_flow(SIGNUP).unwrap();
    let mut decider = |_: &Step| Some("If error".to_string());
    let path = resolve(&flow, &mut decider).unwrap();

    assert_eq!(
      descriptions(&path),
      vec![
        "Open the signup page",
        "Submit the form",
        "Verify the error message is shown",
        "Log out"
      ]
    );
    assert_eq!(
      path.untaken,
      vec![UntakenBranch {
        step: "Submit the form".into(),
        label: "If successful".into()
      }]
    );
  }

  #[test]
  fn test_first_branch_excludes_siblings() {
    let flow = parse_flow(SIGNUP).unwrap();
    let mut first = |s: &Step| s.branches.first().map(|b| b.label.clone());
    let path = resolve(&flow, &mut first).unwrap();

    let steps = descriptions(&path);
    assert!(steps.contains(&"Verify the dashboard loads".to_string()));
    assert!(steps.contains(&"Verify the welcome banner is shown".to_string()));
    assert!(!steps.contains(&"Verify the error message is shown".to_string()));
    assert_eq!(path.len(), 5);
  }

  #[test]
  fn test_steps_without_branches_never_consult_decider() {
    let flow = parse_flow("Flow: Plain\n  → a\n  → b\n").unwrap();
    let mut calls = 0;
    let mut counting = |_: &Step| -> Option<String> {
      calls += 1;
      None
    };
    let path = resolve(&flow, &mut counting).unwrap();
    assert_eq!(path.len(), 2);
    assert_eq!(calls, 0);
  }

  #[test]
  fn test_no_matching_branch() {
    let flow = parse_flow(SIGNUP).unwrap();

    let mut unknown = |_: &Step| Some("If timeout".to_string());
    assert_eq!(
      resolve(&flow, &mut unknown).unwrap_err(),
      ResolutionError::NoMatchingBranch {
        step: "Submit the form".into(),
        reported: Some("If timeout".into())
      }
    );

    let mut silent = |_: &Step| -> Option<String> { None };
    assert!(matches!(
      resolve(&flow, &mut silent),
      Err(ResolutionError::NoMatchingBranch { reported: None, .. })
    ));
  }

  #[test]
  fn test_resolution_is_deterministic() {
    let flow = parse_flow(SIGNUP).unwrap();
    let mut a = |_: &Step| Some("if successful:".to_string());
    let mut b = |_: &Step| Some("if successful:".to_string());
    let first = resolve(&flow, &mut a).unwrap();
    let second = resolve(&flow, &mut b).unwrap();
    assert_eq!(descriptions(&first), descriptions(&second));
    assert_eq!(first.untaken, second.untaken);
  }

  #[test]
  fn test_label_preference() {
    let flow = parse_flow(SIGNUP).unwrap();

    let mut prefer_error = LabelPreference::new(vec!["If error".into()], Fallback::FirstBranch);
    let path = resolve(&flow, &mut prefer_error).unwrap();
    assert!(descriptions(&path).contains(&"Verify the error message is shown".to_string()));

    let mut fallback = LabelPreference::new(vec!["If offline".into()], Fallback::FirstBranch);
    let path = resolve(&flow, &mut fallback).unwrap();
    assert!(descriptions(&path).contains(&"Verify the dashboard loads".to_string()));

    let mut strict = LabelPreference::new(vec!["If offline".into()], Fallback::Strict);
    assert!(resolve(&flow, &mut strict).is_err());
  }
}
