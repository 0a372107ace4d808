use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{FlowcheckError, Result};

fn git(repo_path: &Path, args: &[&str]) -> Result<String> {
  let output = Command::new("git")
    .args(args)
    .current_dir(repo_path)
    .output()?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(FlowcheckError::Git(format!(
      "git {} failed: {}",
      args.first().unwrap_or(&""),
      stderr.trim()
    )));
  }

  Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn head_commit(repo_path: &Path) -> Result<String> {
  Ok(git(repo_path, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Files changed on this branch since it forked from `base`, plus
/// uncommitted changes in the working tree. Sorted, without duplicates.
pub fn changed_files(repo_path: &Path, base: &str) -> Result<Vec<String>> {
  let committed = match git(
    repo_path,
    &["diff", "--name-only", &format!("{base}...HEAD")],
  ) {
    Ok(out) => out,
    Err(e) => {
      debug!("no merge base with {base} ({e}), using working tree only");
      String::new()
    }
  };
  let uncommitted = git(repo_path, &["diff", "--name-only", "HEAD"])?;
  let untracked = git(
    repo_path,
    &["ls-files", "--others", "--exclude-standard"],
  )?;

  let mut files: Vec<String> = [committed, uncommitted, untracked]
    .iter()
    .flat_map(|out| out.lines())
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .map(str::to_string)
    .collect();
  files.sort();
  files.dedup();

  debug!("{} changed file(s) against {base}", files.len());
  Ok(files)
}
