use std::path::PathBuf;

/// Structural problems in flow text. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
  #[error("missing `Flow: <name>` header")]
  MissingHeader,

  #[error("bad nesting at line {line}: {detail}")]
  BadNesting { line: usize, detail: String },

  #[error("flow `{name}` has no steps")]
  EmptyFlow { name: String },

  #[error("line {line}: top-level step must start with an arrow")]
  MissingArrow { line: usize },

  #[error("line {line}: branch `{label}` has no steps")]
  EmptyBranch { line: usize, label: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
  #[error("no branch of `{step}` matches {}", describe_reported(.reported))]
  NoMatchingBranch {
    step: String,
    reported: Option<String>,
  },
}

fn describe_reported(reported: &Option<String>) -> String {
  match reported {
    Some(label) => format!("`{label}`"),
    None => "no decision".to_string(),
  }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowcheckError {
  #[error("config error: {0}")]
  Config(String),

  #[error("config file not found: {0}")]
  ConfigNotFound(PathBuf),

  #[error("{path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: ParseError,
  },

  #[error("flow `{flow}`: {source}")]
  Resolution {
    flow: String,
    #[source]
    source: ResolutionError,
  },

  #[error("unknown flow: {0}")]
  UnknownFlow(String),

  #[error("git error: {0}")]
  Git(String),

  #[error("driver error: {0}")]
  Driver(String),

  #[error("timeout: {0}")]
  Timeout(String),

  #[error("state error: {0}")]
  State(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("yaml error: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("glob error: {0}")]
  Glob(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, FlowcheckError>;
