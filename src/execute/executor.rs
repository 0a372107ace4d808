use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::driver::{Driver, Outcome};
use crate::execute::result::{StepOutcome, ValidationResult};
use crate::flow::model::{Step, StepKind};
use crate::resolve::ResolvedPath;

/// Dispatches each step of a resolved path to a driver, in order, stopping
/// at the first step that does not pass.
#[derive(Clone)]
pub struct Executor {
  driver: Arc<dyn Driver>,
  step_timeout: Option<Duration>,
}

impl Executor {
  pub fn new(driver: Arc<dyn Driver>) -> Self {
    Self {
      driver,
      step_timeout: None,
    }
  }

  pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
    self.step_timeout = Some(timeout);
    self
  }

  pub async fn execute(&self, path: &ResolvedPath<'_>) -> ValidationResult {
    let mut result = ValidationResult::new(path);
    info!("validating flow `{}` ({} steps)", result.flow, path.len());

    for (index, step) in path.steps.iter().enumerate() {
      result.begin();
      debug!("step {}: {} ({})", index + 1, step.description, step.kind);

      let outcome = self.dispatch(step).await;
      if !matches!(outcome, Outcome::Pass) {
        warn!(
          "flow `{}` step {} failed: {} ({outcome})",
          result.flow,
          index + 1,
          step.description
        );
      }
      result.record(index, StepOutcome::from(outcome));
      if result.status.is_terminal() {
        break;
      }
    }

    result.finish();
    info!("flow `{}`: {}", result.flow, result.status);
    result
  }

  /// Builds the report without contacting the driver.
  pub fn dry_run(path: &ResolvedPath<'_>) -> ValidationResult {
    ValidationResult::new(path)
  }

  async fn dispatch(&self, step: &Step) -> Outcome {
    let driver = self.driver.clone();
    let kind = step.kind;
    let description = step.description.clone();

    let call = tokio::task::spawn_blocking(move || match kind {
      StepKind::Action => driver.perform_action(&description),
      StepKind::Assertion => driver.check_assertion(&description),
    });

    let joined = match self.step_timeout {
      Some(limit) => match tokio::time::timeout(limit, call).await {
        Ok(joined) => joined,
        Err(_) => {
          // The blocking call keeps running until the driver's own timeout
          // fires; `Config::validate` keeps that one shorter.
          warn!("step timed out after {}ms", limit.as_millis());
          return Outcome::Timeout;
        }
      },
      None => call.await,
    };

    joined.unwrap_or_else(|e| Outcome::Fail {
      reason: format!("driver panicked: {e}"),
    })
  }
}
