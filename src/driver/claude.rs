//! One-shot `claude -p` sessions that end in a pass/fail verdict.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DriverSettings;
use crate::error::{FlowcheckError, Result};

pub const HAIKU: &str = "claude-haiku-4-5-20251001";
pub const SONNET: &str = "claude-sonnet-4-5-20250929";
pub const OPUS: &str = "claude-opus-4-6";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const VERDICT_FORMAT: &str = r#"Reply with JSON only:
{"passed": true|false, "reason": "<one sentence on what you observed>"}"#;

/// Maps a short model alias from config to a model id. Unknown names are
/// passed through unchanged.
pub fn resolve_model(name: &str) -> String {
  match name.to_lowercase().as_str() {
    "haiku" => HAIKU.to_string(),
    "sonnet" => SONNET.to_string(),
    "opus" => OPUS.to_string(),
    _ => name.to_string(),
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Verdict {
  pub passed: bool,
  #[serde(default)]
  pub reason: String,
}

/// Answers a prompt about one step with a verdict.
pub trait Judge {
  fn judge(&self, prompt: &str) -> Result<Verdict>;
}

/// `claude -p --output-format json`, configured once per driver.
pub struct ClaudeCli {
  program: String,
  model: String,
  allowed_tools: Vec<String>,
  system_prompt: String,
  cwd: PathBuf,
  timeout: Duration,
}

impl ClaudeCli {
  pub fn new(settings: &DriverSettings, instructions: &str, cwd: PathBuf) -> Self {
    Self {
      program: settings.agent_bin.clone(),
      model: resolve_model(&settings.agent_model),
      allowed_tools: settings.agent_tools.clone(),
      system_prompt: format!("{instructions}\n\n{VERDICT_FORMAT}"),
      cwd,
      timeout: Duration::from_secs(settings.request_timeout_secs),
    }
  }

  fn command(&self) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd
      .args(["-p", "--model", &self.model, "--output-format", "json"])
      .args(["--append-system-prompt", &self.system_prompt])
      .current_dir(&self.cwd)
      .env_remove("CLAUDE_CODE_ENTRYPOINT")
      .env_remove("CLAUDECODE")
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if !self.allowed_tools.is_empty() {
      cmd.args(["--allowedTools", &self.allowed_tools.join(",")]);
    }
    cmd
  }
}

impl Judge for ClaudeCli {
  fn judge(&self, prompt: &str) -> Result<Verdict> {
    info!("asking {} ({})", self.program, self.model);
    debug!("prompt: {prompt}");

    let mut child = self.command().spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
      match stdin.write_all(prompt.as_bytes()) {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
          debug!("{} closed stdin early", self.program);
        }
        other => other?,
      }
    }

    let (status, stdout, stderr) = wait_for(child, self.timeout)?;
    if !status.success() {
      return Err(FlowcheckError::Driver(format!(
        "{} exited with {status}: {}",
        self.program,
        stderr.trim()
      )));
    }
    parse_verdict(&stdout)
  }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
  std::thread::spawn(move || {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
      let _ = pipe.read_to_end(&mut buf);
    }
    buf
  })
}

/// Collects the child's output, killing it once `timeout` has passed.
fn wait_for(mut child: Child, timeout: Duration) -> Result<(ExitStatus, String, String)> {
  let stdout = drain(child.stdout.take());
  let stderr = drain(child.stderr.take());
  let deadline = Instant::now() + timeout;

  let status = loop {
    if let Some(status) = child.try_wait()? {
      break status;
    }
    if Instant::now() >= deadline {
      warn!("no verdict after {}s, killing", timeout.as_secs());
      let _ = child.kill();
      let _ = child.wait();
      return Err(FlowcheckError::Timeout(format!(
        "no verdict after {}s",
        timeout.as_secs()
      )));
    }
    std::thread::sleep(POLL_INTERVAL);
  };

  let text = |handle: JoinHandle<Vec<u8>>| {
    String::from_utf8_lossy(&handle.join().unwrap_or_default()).into_owned()
  };
  Ok((status, text(stdout), text(stderr)))
}

#[derive(Deserialize)]
struct Envelope {
  #[serde(default)]
  result: Option<String>,
  #[serde(default)]
  is_error: bool,
}

fn parse_verdict(stdout: &str) -> Result<Verdict> {
  let envelope: Envelope = serde_json::from_str(stdout.trim())?;
  let text = envelope
    .result
    .ok_or_else(|| FlowcheckError::Driver("claude reply has no result".into()))?;
  if envelope.is_error {
    return Err(FlowcheckError::Driver(format!("claude reported an error: {text}")));
  }
  find_verdict(&text)
    .ok_or_else(|| FlowcheckError::Driver(format!("no verdict in reply: {text}")))
}

/// First JSON object in `text` that reads as a verdict. Fences and prose
/// around it are ignored.
fn find_verdict(text: &str) -> Option<Verdict> {
  text.match_indices('{').find_map(|(start, _)| {
    serde_json::Deserializer::from_str(&text[start..])
      .into_iter::<Verdict>()
      .next()?
      .ok()
  })
}
