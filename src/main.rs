use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use flowcheck::config::Config;
use flowcheck::coverage;
use flowcheck::driver;
use flowcheck::error::{FlowcheckError, Result};
use flowcheck::flow::model::slugify;
use flowcheck::flow::registry::{self, FlowEntry, FLOW_EXTENSION};
use flowcheck::git;
use flowcheck::pipeline::run::{run_flows, DriverFactory, RunOptions};
use flowcheck::state::tracker::StateTracker;

#[derive(Parser)]
#[command(
  name = "flowcheck",
  about = "Validate changes by walking plain-text user flows against a live system"
)]
struct Cli {
  #[command(subcommand)]
  command: Commands,

  /// Path to config file
  #[arg(short, long, default_value = "flowcheck.yaml")]
  config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
  /// Parse a flow file and print the result as YAML
  Parse {
    file: PathBuf,
  },
  /// Parse flow files and report errors without running anything
  Check {
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },
  /// Resolve and execute flows
  Run {
    /// Only run these flows (repeatable)
    #[arg(long = "flow")]
    flows: Vec<String>,
    /// Prefer this branch label where a step offers it (repeatable)
    #[arg(long)]
    take: Vec<String>,
    /// Error when no preferred label matches instead of taking the first branch
    #[arg(long)]
    strict: bool,
    /// Print the resolved paths without executing them
    #[arg(long)]
    dry_run: bool,
    /// Only run flows affected by changes against the base branch
    #[arg(long)]
    changed: bool,
  },
  /// List flows affected by the current changes
  Affected {
    /// Compare against this ref instead of the configured base branch
    #[arg(long)]
    base: Option<String>,
  },
  /// Show the outcome of the last run of each flow
  Status,
  /// Run affected flows whenever HEAD moves
  Watch,
  /// Scaffold a new flow file
  New {
    name: String,
  },
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  match run(cli).await {
    Ok(true) => {}
    Ok(false) => std::process::exit(1),
    Err(e) => {
      error!("{e}");
      std::process::exit(1);
    }
  }
}

/// Returns whether the command succeeded; `false` exits non-zero without an error.
async fn run(cli: Cli) -> Result<bool> {
  match cli.command {
    Commands::Parse { file } => cmd_parse(&file).map(|_| true),
    Commands::Check { files } => Ok(cmd_check(&files)),
    Commands::Run {
      flows,
      take,
      strict,
      dry_run,
      changed,
    } => {
      let config = Config::load(&cli.config)?;
      let options = RunOptions {
        take,
        strict,
        dry_run,
      };
      cmd_run(&config, &flows, &options, changed).await
    }
    Commands::Affected { base } => {
      let config = Config::load(&cli.config)?;
      cmd_affected(&config, base.as_deref()).map(|_| true)
    }
    Commands::Status => {
      let config = Config::load(&cli.config)?;
      cmd_status(&config)
    }
    Commands::Watch => {
      let config = Config::load(&cli.config)?;
      cmd_watch(&config).await.map(|_| true)
    }
    Commands::New { name } => {
      let config = Config::load(&cli.config)?;
      cmd_new(&config, &name).map(|_| true)
    }
  }
}

fn cmd_parse(file: &Path) -> Result<()> {
  let flows: Vec<_> = registry::load_file(file)?
    .into_iter()
    .map(|entry| entry.flow)
    .collect();
  print!("{}", serde_yaml::to_string(&flows)?);
  Ok(())
}

fn cmd_check(files: &[PathBuf]) -> bool {
  let mut ok = true;
  for file in files {
    match registry::load_file(file) {
      Ok(entries) => {
        for entry in &entries {
          println!("ok: {} ({} steps)", entry, entry.flow.step_count());
        }
      }
      Err(e) => {
        error!("{e}");
        ok = false;
      }
    }
  }
  ok
}

fn drivers() -> DriverFactory {
  Arc::new(driver::build)
}

fn affected_entries(config: &Config, entries: Vec<FlowEntry>, base: &str) -> Result<Vec<FlowEntry>> {
  let repo = Config::repo_path();
  let changed = git::diff::changed_files(&repo, base)?;
  let names: Vec<String> = coverage::affected(&entries, config, &repo, &changed)?
    .into_iter()
    .map(|e| e.flow.name.clone())
    .collect();
  Ok(
    entries
      .into_iter()
      .filter(|e| names.contains(&e.flow.name))
      .collect(),
  )
}

async fn cmd_run(
  config: &Config,
  flows: &[String],
  options: &RunOptions,
  changed: bool,
) -> Result<bool> {
  let mut entries = registry::load_all(&config.settings.flows_dir)?;
  if !flows.is_empty() {
    entries = registry::select(entries, flows)?;
  }
  if changed {
    entries = affected_entries(config, entries, &config.settings.base_branch)?;
  }

  let state = StateTracker::load(&config.settings.state_file)?.into_shared();
  let summary = run_flows(config, entries, options, &state, drivers()).await?;

  for result in &summary.results {
    print!("{result}");
  }
  for (flow, reason) in &summary.errors {
    println!("{flow}: error: {reason}");
  }

  if options.dry_run {
    return Ok(summary.errors.is_empty());
  }
  println!("{summary}");
  Ok(summary.all_passed())
}

fn cmd_affected(config: &Config, base: Option<&str>) -> Result<()> {
  let base = base.unwrap_or(&config.settings.base_branch);
  let entries = registry::load_all(&config.settings.flows_dir)?;
  let affected = affected_entries(config, entries, base)?;

  if affected.is_empty() {
    println!("No flows affected.");
  }
  for entry in &affected {
    println!("{entry}");
  }
  Ok(())
}

fn cmd_status(config: &Config) -> Result<bool> {
  let state = StateTracker::load(&config.settings.state_file)?;
  let summary = state.summary();

  println!("flowcheck status");
  println!("================");
  println!("{summary}");
  println!();

  for (name, flow_state) in state.all_flows() {
    let status = format!("{:?}", flow_state.status);
    let detail = flow_state
      .failed_step
      .as_ref()
      .or(flow_state.error.as_ref())
      .map(|d| format!(" ({d})"))
      .unwrap_or_default();
    let when = flow_state
      .completed_at
      .map(|t| format!(" at {}", t.format("%Y-%m-%d %H:%M:%S")))
      .unwrap_or_default();
    println!("  {name}: {status}{detail}{when}");
  }

  Ok(state.blocking_flows().is_empty())
}

async fn cmd_watch(config: &Config) -> Result<()> {
  let interval = std::time::Duration::from_secs(config.settings.poll_interval_secs);
  let repo_path = Config::repo_path();
  let mut last: Option<String> = None;

  loop {
    match git::diff::head_commit(&repo_path) {
      Ok(head) if last.as_deref() != Some(head.as_str()) => {
        let base = last.clone().unwrap_or_else(|| config.settings.base_branch.clone());
        info!("HEAD at {head}, running flows affected since {base}");
        if let Err(e) = watch_once(config, &base).await {
          warn!("run error (will retry): {e}");
        }
        last = Some(head);
      }
      Ok(_) => {}
      Err(e) => warn!("could not read HEAD: {e}"),
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            return Ok(());
        }
        _ = tokio::time::sleep(interval) => {}
    }
  }
}

async fn watch_once(config: &Config, base: &str) -> Result<()> {
  let entries = registry::load_all(&config.settings.flows_dir)?;
  let entries = affected_entries(config, entries, base)?;
  let state = StateTracker::load(&config.settings.state_file)?.into_shared();
  let summary = run_flows(config, entries, &RunOptions::default(), &state, drivers()).await?;
  if !summary.all_passed() {
    warn!("{summary}");
  }
  Ok(())
}

fn cmd_new(config: &Config, name: &str) -> Result<()> {
  let dir = &config.settings.flows_dir;
  std::fs::create_dir_all(dir)?;

  let path = dir.join(format!("{}.{FLOW_EXTENSION}", slugify(name)));
  if path.exists() {
    return Err(FlowcheckError::Config(format!(
      "{} already exists",
      path.display()
    )));
  }

  let template = format!(
    "Flow: {name}\n  → Navigate to the start page\n  → Submit the form\n  → If successful:\n      → Verify the confirmation appears\n  → If error:\n      → Verify an error message is shown\n"
  );
  std::fs::write(&path, template)?;

  println!("Created flow `{name}`");
  println!("{}", path.display());
  Ok(())
}
