use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::driver::Driver;
use crate::error::{FlowcheckError, Result};
use crate::execute::{Executor, ValidationResult};
use crate::flow::registry::FlowEntry;
use crate::git;
use crate::pipeline::report;
use crate::resolve::{resolve, Fallback, LabelPreference};
use crate::state::tracker::SharedState;

/// Builds the driver a flow runs against, given its effective config.
pub type DriverFactory = Arc<dyn Fn(&Config) -> Result<Arc<dyn Driver>> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Branch labels to prefer, in order.
  pub take: Vec<String>,
  /// Fail resolution instead of falling back to the first branch.
  pub strict: bool,
  pub dry_run: bool,
}

impl RunOptions {
  fn preference(&self) -> LabelPreference {
    let fallback = if self.strict {
      Fallback::Strict
    } else {
      Fallback::FirstBranch
    };
    LabelPreference::new(self.take.clone(), fallback)
  }
}

#[derive(Debug, Default)]
pub struct RunSummary {
  pub results: Vec<ValidationResult>,
  /// Flows that could not be run at all, with the reason.
  pub errors: Vec<(String, String)>,
}

impl RunSummary {
  pub fn all_passed(&self) -> bool {
    self.errors.is_empty() && self.results.iter().all(|r| r.passed())
  }

  pub fn failed(&self) -> usize {
    self.errors.len() + self.results.iter().filter(|r| !r.passed()).count()
  }
}

impl std::fmt::Display for RunSummary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} flow(s), {} passed, {} failed",
      self.results.len() + self.errors.len(),
      self.results.iter().filter(|r| r.passed()).count(),
      self.failed()
    )
  }
}

enum FlowRun {
  Finished(ValidationResult),
  Errored(String),
}

pub async fn run_flows(
  config: &Config,
  entries: Vec<FlowEntry>,
  options: &RunOptions,
  state: &SharedState,
  drivers: DriverFactory,
) -> Result<RunSummary> {
  let mut summary = RunSummary::default();
  if entries.is_empty() {
    info!("no flows to run");
    return Ok(summary);
  }

  info!("running {} flow(s)", entries.len());

  if options.dry_run {
    for entry in &entries {
      let mut preference = options.preference();
      match resolve(&entry.flow, &mut preference) {
        Ok(path) => summary.results.push(Executor::dry_run(&path)),
        Err(e) => summary.errors.push((entry.flow.name.clone(), e.to_string())),
      }
    }
    return Ok(summary);
  }

  let commit = git::diff::head_commit(&Config::repo_path()).ok();
  let semaphore = Arc::new(Semaphore::new(config.settings.parallel_flows));
  let mut flow_set = JoinSet::new();
  let mut pending: BTreeSet<String> = BTreeSet::new();

  for entry in entries {
    let sem = semaphore.clone();
    let state = state.clone();
    let config = config.clone();
    let options = options.clone();
    let drivers = drivers.clone();
    let commit = commit.clone();
    let name = entry.flow.name.clone();
    pending.insert(name.clone());

    flow_set.spawn(async move {
      let run =
        process_flow(entry, &config, &options, &state, &sem, &drivers, commit.as_deref()).await;
      (name, run)
    });
  }

  while let Some(joined) = flow_set.join_next().await {
    match joined {
      Ok((name, run)) => {
        pending.remove(&name);
        match run {
          Ok(FlowRun::Finished(result)) => summary.results.push(result),
          Ok(FlowRun::Errored(reason)) => summary.errors.push((name, reason)),
          Err(e) => {
            error!("flow `{name}` error: {e}");
            summary.errors.push((name, e.to_string()));
          }
        }
      }
      Err(e) => error!("flow join error: {e}"),
    }
  }

  // Tasks that panicked never reported their name.
  for name in pending {
    summary.errors.push((name, "flow task aborted".to_string()));
  }

  summary.results.sort_by(|a, b| a.flow.cmp(&b.flow));
  summary.errors.sort();

  let states = state.lock().unwrap().summary();
  info!("run complete: {summary} ({states})");

  Ok(summary)
}

async fn process_flow(
  entry: FlowEntry,
  config: &Config,
  options: &RunOptions,
  state: &SharedState,
  semaphore: &Semaphore,
  drivers: &DriverFactory,
  commit: Option<&str>,
) -> Result<FlowRun> {
  let name = entry.flow.name.clone();

  let mut preference = options.preference();
  let path = match resolve(&entry.flow, &mut preference) {
    Ok(path) => path,
    Err(source) => {
      let e = FlowcheckError::Resolution {
        flow: name.clone(),
        source,
      };
      warn!("{e}");
      state.lock().unwrap().set_error(&name, &e.to_string())?;
      return Ok(FlowRun::Errored(e.to_string()));
    }
  };

  let _permit = semaphore
    .acquire()
    .await
    .map_err(|e| FlowcheckError::State(format!("semaphore: {e}")))?;

  let flow_config = config.for_flow(&name);
  let driver = match drivers(&flow_config) {
    Ok(driver) => driver,
    Err(e) => {
      warn!("flow `{name}`: driver unavailable: {e}");
      state.lock().unwrap().set_error(&name, &e.to_string())?;
      return Ok(FlowRun::Errored(e.to_string()));
    }
  };

  state.lock().unwrap().set_running(&name, commit)?;
  let executor = Executor::new(driver)
    .with_step_timeout(Duration::from_secs(config.settings.step_timeout_secs));
  let result = executor.execute(&path).await;

  if let Err(e) = report::write_result(&config.settings.results_dir, &result) {
    error!("failed to write result for `{name}`: {e}");
  }
  state.lock().unwrap().record_result(&result)?;

  Ok(FlowRun::Finished(result))
}
