//! Which flows does a change touch?
//!
//! A flow with coverage globs is affected when a changed path matches one of
//! them, or when its own `.flow` file changed. A flow without globs cannot be
//! ruled out and is always affected. No changes means nothing is affected.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::flow::registry::FlowEntry;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

/// `changed` holds paths relative to `repo_root`, as git reports them.
pub fn affected<'a>(
  flows: &'a [FlowEntry],
  config: &Config,
  repo_root: &Path,
  changed: &[String],
) -> Result<Vec<&'a FlowEntry>> {
  if changed.is_empty() {
    return Ok(Vec::new());
  }

  let mut selected = Vec::new();
  for entry in flows {
    let flow_file = repo_root.join(&entry.path);
    let own_file_changed = changed.iter().any(|c| repo_root.join(c) == flow_file);

    let patterns = match config.rule_for(&entry.flow.name) {
      Some(rule) if !rule.paths.is_empty() => rule
        .paths
        .iter()
        .map(|p| Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?,
      _ => {
        debug!("`{}` has no coverage globs, treating as affected", entry.flow.name);
        selected.push(entry);
        continue;
      }
    };

    let matched = changed
      .iter()
      .find(|c| patterns.iter().any(|p| p.matches_with(c, MATCH_OPTIONS)));
    if let Some(path) = matched {
      debug!("`{}` affected by {path}", entry.flow.name);
      selected.push(entry);
    } else if own_file_changed {
      debug!("`{}` affected by its flow file", entry.flow.name);
      selected.push(entry);
    }
  }
  Ok(selected)
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::config::FlowRule;
  use crate::flow::parser::parse_flow;

  fn entry(file: &str, name: &str) -> FlowEntry {
    FlowEntry {
      path: PathBuf::from(file),
      flow: parse_flow(&format!("Flow: {name}\n  → step\n")).unwrap(),
    }
  }

  fn config() -> Config {
    let mut config = Config::default();
    config.flows = vec![
      FlowRule {
        flow: "Create Project".into(),
        paths: vec!["src/projects/**".into(), "src/api/projects.rs".into()],
        driver: None,
      },
      FlowRule {
        flow: "Login".into(),
        paths: vec!["src/auth/*.rs".into()],
        driver: None,
      },
    ];
    config
  }

  fn root() -> &'static Path {
    Path::new("/repo")
  }

  fn names(selected: &[&FlowEntry]) -> Vec<String> {
    selected.iter().map(|e| e.flow.name.clone()).collect()
  }

  #[test]
  fn test_globs_select_flows() {
    let flows = vec![
      entry("flows/projects.flow", "Create Project"),
      entry("flows/auth.flow", "Login"),
    ];
    let config = config();

    let changed = vec!["src/projects/form/view.rs".to_string()];
    assert_eq!(names(&affected(&flows, &config, root(), &changed).unwrap()), vec!["Create Project"]);

    let changed = vec!["src/auth/session.rs".to_string()];
    assert_eq!(names(&affected(&flows, &config, root(), &changed).unwrap()), vec!["Login"]);

    let changed = vec!["src/auth/nested/deep.rs".to_string(), "README.md".to_string()];
    assert!(affected(&flows, &config, root(), &changed).unwrap().is_empty());
  }

  #[test]
  fn test_uncovered_flows_always_affected() {
    let flows = vec![
      entry("flows/projects.flow", "Create Project"),
      entry("flows/misc.flow", "Checkout"),
    ];
    let changed = vec!["docs/index.md".to_string()];
    assert_eq!(names(&affected(&flows, &config(), root(), &changed).unwrap()), vec!["Checkout"]);
  }

  #[test]
  fn test_flow_file_change_selects_flow() {
    let flows = vec![entry("flows/auth.flow", "Login")];
    let changed = vec!["flows/auth.flow".to_string()];
    assert_eq!(names(&affected(&flows, &config(), root(), &changed).unwrap()), vec!["Login"]);
  }

  #[test]
  fn test_same_file_name_elsewhere_does_not_select_flow() {
    let flows = vec![entry("flows/auth.flow", "Login")];
    for other in ["auth.flow", "old/flows/auth.flow", "docs/auth.flow"] {
      let changed = vec![other.to_string()];
      assert!(
        affected(&flows, &config(), root(), &changed).unwrap().is_empty(),
        "{other} selected Login"
      );
    }
  }

  #[test]
  fn test_absolute_flow_path_matches_relative_change() {
    let flows = vec![entry("/repo/flows/auth.flow", "Login")];
    let changed = vec!["flows/auth.flow".to_string()];
    assert_eq!(names(&affected(&flows, &config(), root(), &changed).unwrap()), vec!["Login"]);
  }

  #[test]
  fn test_no_changes_selects_nothing() {
    let flows = vec![entry("flows/misc.flow", "Checkout")];
    assert!(affected(&flows, &config(), root(), &[]).unwrap().is_empty());
  }
}
