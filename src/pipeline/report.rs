use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::execute::result::ValidationResult;
use crate::flow::model::slugify;

pub fn result_path(results_dir: &Path, flow: &str) -> PathBuf {
  results_dir.join(format!("{}.yaml", slugify(flow)))
}

/// Writes the latest result for a flow, replacing the previous one.
pub fn write_result(results_dir: &Path, result: &ValidationResult) -> Result<PathBuf> {
  std::fs::create_dir_all(results_dir)?;
  let path = result_path(results_dir, &result.flow);
  let content = serde_yaml::to_string(result)?;
  std::fs::write(&path, content)?;
  info!("wrote result: {}", path.display());
  Ok(path)
}

pub fn read_result(results_dir: &Path, flow: &str) -> Result<Option<ValidationResult>> {
  let path = result_path(results_dir, flow);
  if !path.exists() {
    return Ok(None);
  }
  let content = std::fs::read_to_string(&path)?;
  Ok(Some(serde_yaml::from_str(&content)?))
}
