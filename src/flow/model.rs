use serde::{Deserialize, Serialize};

/// Leading words that turn a step into an assertion.
pub const ASSERTION_VERBS: &[&str] = &[
  "verify", "check", "expect", "assert", "ensure", "confirm", "see", "should",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
  Action,
  Assertion,
}

impl StepKind {
  pub fn classify(description: &str) -> Self {
    let first = description
      .split_whitespace()
      .next()
      .unwrap_or_default()
      .trim_end_matches(|c: char| !c.is_alphanumeric())
      .to_lowercase();

    if ASSERTION_VERBS.contains(&first.as_str()) {
      StepKind::Assertion
    } else {
      StepKind::Action
    }
  }
}

impl std::fmt::Display for StepKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StepKind::Action => write!(f, "action"),
      StepKind::Assertion => write!(f, "assertion"),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
  pub kind: StepKind,
  pub description: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub branches: Vec<Branch>,
}

impl Step {
  pub fn new(description: impl Into<String>) -> Self {
    let description = description.into();
    Self {
      kind: StepKind::classify(&description),
      description,
      branches: Vec::new(),
    }
  }

  pub fn with_branch(mut self, branch: Branch) -> Self {
    self.branches.push(branch);
    self
  }

  pub fn has_branches(&self) -> bool {
    !self.branches.is_empty()
  }

  /// Finds a branch by label, ignoring ASCII case and a trailing colon.
  pub fn branch(&self, label: &str) -> Option<&Branch> {
    let wanted = normalize_label(label);
    self
      .branches
      .iter()
      .find(|b| b.label.eq_ignore_ascii_case(wanted))
  }
}

impl std::fmt::Display for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.description)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
  pub label: String,
  pub steps: Vec<Step>,
}

impl Branch {
  pub fn new(label: &str, steps: Vec<Step>) -> Self {
    Self {
      label: normalize_label(label).to_string(),
      steps,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flow {
  pub name: String,
  pub steps: Vec<Step>,
}

impl Flow {
  /// Total number of steps in the tree, branch steps included.
  pub fn step_count(&self) -> usize {
    fn count(steps: &[Step]) -> usize {
      steps
        .iter()
        .map(|s| 1 + s.branches.iter().map(|b| count(&b.steps)).sum::<usize>())
        .sum()
    }
    count(&self.steps)
  }

  /// File-name friendly form of the flow name.
  pub fn slug(&self) -> String {
    slugify(&self.name)
  }
}

impl std::fmt::Display for Flow {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name)
  }
}

pub fn slugify(name: &str) -> String {
  let mut slug = String::new();
  for c in name.chars() {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
    } else if !slug.is_empty() && !slug.ends_with('-') {
      slug.push('-');
    }
  }
  let slug = slug.trim_end_matches('-');
  if slug.is_empty() {
    "flow".to_string()
  } else {
    slug.to_string()
  }
}

pub(crate) fn normalize_label(label: &str) -> &str {
  label.trim().trim_end_matches(':').trim_end()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify() {
    assert_eq!(StepKind::classify("Verify project page appears"), StepKind::Assertion);
    assert_eq!(StepKind::classify("expect 201"), StepKind::Assertion);
    assert_eq!(StepKind::classify("See: the banner"), StepKind::Assertion);
    assert_eq!(StepKind::classify("Click \"Create Project\" button"), StepKind::Action);
    assert_eq!(StepKind::classify("POST /api/projects"), StepKind::Action);
    assert_eq!(StepKind::classify("Verifying nothing"), StepKind::Action);
  }

  #[test]
  fn test_branch_lookup_ignores_case_and_colon() {
    let step = Step::new("Submit form")
      .with_branch(Branch::new("If successful:", vec![Step::new("Verify redirect")]))
      .with_branch(Branch::new("If error", vec![Step::new("Verify message")]));

    assert_eq!(step.branches[0].label, "If successful");
    assert!(step.branch("if SUCCESSFUL").is_some());
    assert!(step.branch("If error:").is_some());
    assert!(step.branch("If timeout").is_none());
  }

  #[test]
  fn test_step_count_and_slug() {
    let flow = Flow {
      name: "Create Project (happy path)".into(),
      steps: vec![
        Step::new("Open home"),
        Step::new("Submit").with_branch(Branch::new(
          "If successful",
          vec![Step::new("Verify list"), Step::new("Verify title")],
        )),
      ],
    };
    assert_eq!(flow.step_count(), 4);
    assert_eq!(flow.slug(), "create-project-happy-path");
  }
}
