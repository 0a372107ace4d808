use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{FlowcheckError, Result};
use crate::flow::model::Flow;
use crate::flow::parser::parse_document;

pub const FLOW_EXTENSION: &str = "flow";

/// A parsed flow together with the file it came from.
#[derive(Debug, Clone)]
pub struct FlowEntry {
  pub path: PathBuf,
  pub flow: Flow,
}

impl std::fmt::Display for FlowEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.flow.name, self.path.display())
  }
}

pub fn load_file(path: &Path) -> Result<Vec<FlowEntry>> {
  let content = std::fs::read_to_string(path)?;
  let flows = parse_document(&content).map_err(|source| FlowcheckError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  debug!("{}: {} flow(s)", path.display(), flows.len());
  Ok(
    flows
      .into_iter()
      .map(|flow| FlowEntry {
        path: path.to_path_buf(),
        flow,
      })
      .collect(),
  )
}

/// Loads every `*.flow` file directly under `flows_dir`, sorted by file name.
/// Flow slugs must be unique across the directory, since results and state
/// are stored under them.
pub fn load_all(flows_dir: &Path) -> Result<Vec<FlowEntry>> {
  if !flows_dir.exists() {
    info!("flows: 0");
    return Ok(Vec::new());
  }

  let mut entries: Vec<_> = std::fs::read_dir(flows_dir)?
    .filter_map(|e| e.ok())
    .collect();
  entries.sort_by_key(|e| e.file_name());

  let mut flows: Vec<FlowEntry> = Vec::new();
  for entry in entries {
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) != Some(FLOW_EXTENSION) {
      continue;
    }

    for loaded in load_file(&path)? {
      let slug = loaded.flow.slug();
      if let Some(existing) = flows.iter().find(|f| f.flow.slug() == slug) {
        return Err(FlowcheckError::Config(format!(
          "flows `{}` ({}) and `{}` ({}) both store results as `{slug}`",
          existing.flow.name,
          existing.path.display(),
          loaded.flow.name,
          loaded.path.display()
        )));
      }
      flows.push(loaded);
    }
  }

  info!("flows: {}", flows.len());
  Ok(flows)
}

/// Keeps only the named flows, in the order requested.
pub fn select(flows: Vec<FlowEntry>, names: &[String]) -> Result<Vec<FlowEntry>> {
  if names.is_empty() {
    return Ok(flows);
  }

  let mut selected = Vec::new();
  for name in names {
    let entry = flows
      .iter()
      .find(|f| f.flow.name.eq_ignore_ascii_case(name))
      .ok_or_else(|| FlowcheckError::UnknownFlow(name.clone()))?;
    selected.push(entry.clone());
  }
  Ok(selected)
}
