//! Parser for the arrow notation used in `.flow` files.
//!
//! ```text
//! Flow: Create Project
//! Navigate to home page
//!   → Click "Create Project" button
//!   → Submit form
//!   → If successful:
//!       → Verify project page appears
//!   → If error:
//!       → Verify error message is shown
//! ```
//!
//! Indentation is counted in spaces. `→` and `->` are both accepted as the
//! arrow. Only a label (`If <outcome>:`) opens a nested level; deeper arrow
//! lines under a plain step continue the same sequence.

use crate::error::ParseError;
use crate::flow::model::{Branch, Flow, Step};

const HEADER: &str = "Flow:";
const ARROWS: &[&str] = &["→", "->"];

struct Line<'a> {
  number: usize,
  indent: usize,
  text: &'a str,
}

enum Entry<'a> {
  Step { text: &'a str, arrow: bool },
  Label(&'a str),
}

struct Frame {
  /// Label text and indent; `None` for the top-level sequence.
  label: Option<(String, usize, usize)>,
  body_indent: Option<usize>,
  /// Indents used by lines of this frame, in first-seen order.
  levels: Vec<usize>,
  last_indent: Option<usize>,
  steps: Vec<Step>,
}

impl Frame {
  fn root() -> Self {
    Self {
      label: None,
      body_indent: None,
      levels: Vec::new(),
      last_indent: None,
      steps: Vec::new(),
    }
  }

  fn branch(label: &str, indent: usize, line: usize) -> Self {
    Self {
      label: Some((label.to_string(), indent, line)),
      ..Self::root()
    }
  }

  fn label_indent(&self) -> Option<usize> {
    self.label.as_ref().map(|(_, indent, _)| *indent)
  }
}

/// Parses text holding exactly one flow block.
pub fn parse_flow(text: &str) -> Result<Flow, ParseError> {
  let mut flows = parse_blocks(text)?;
  match flows.len() {
    1 => flows.pop().ok_or(ParseError::MissingHeader),
    0 => Err(ParseError::MissingHeader),
    _ => {
      let line = second_header_line(text).unwrap_or_default();
      Err(ParseError::BadNesting {
        line,
        detail: "more than one `Flow:` header in a single flow block".into(),
      })
    }
  }
}

/// Parses every flow block in `text`. Blank lines and `#` comments before
/// the first header are ignored.
pub fn parse_document(text: &str) -> Result<Vec<Flow>, ParseError> {
  parse_blocks(text)
}

fn parse_blocks(text: &str) -> Result<Vec<Flow>, ParseError> {
  let mut flows = Vec::new();
  let mut current: Option<(String, Vec<Line<'_>>)> = None;

  for (idx, raw) in text.lines().enumerate() {
    let number = idx + 1;
    let trimmed = raw.trim_end();
    if trimmed.trim_start().is_empty() {
      continue;
    }

    if let Some(rest) = trimmed.strip_prefix(HEADER) {
      let name = rest.trim();
      if name.is_empty() {
        return Err(ParseError::MissingHeader);
      }
      if let Some((name, lines)) = current.take() {
        flows.push(build_flow(name, &lines)?);
      }
      current = Some((name.to_string(), Vec::new()));
      continue;
    }

    match current.as_mut() {
      Some((_, lines)) => lines.push(split_indent(number, trimmed)?),
      None if trimmed.starts_with('#') => continue,
      None => return Err(ParseError::MissingHeader),
    }
  }

  match current {
    Some((name, lines)) => flows.push(build_flow(name, &lines)?),
    None => return Err(ParseError::MissingHeader),
  }

  Ok(flows)
}

fn second_header_line(text: &str) -> Option<usize> {
  text
    .lines()
    .enumerate()
    .filter(|(_, l)| l.starts_with(HEADER))
    .nth(1)
    .map(|(idx, _)| idx + 1)
}

fn split_indent(number: usize, line: &str) -> Result<Line<'_>, ParseError> {
  let text = line.trim_start();
  let leading = &line[..line.len() - text.len()];
  if leading.contains('\t') {
    return Err(ParseError::BadNesting {
      line: number,
      detail: "tab in indentation".into(),
    });
  }
  Ok(Line {
    number,
    indent: leading.len(),
    text,
  })
}

fn strip_arrow(text: &str) -> Option<&str> {
  ARROWS.iter().find_map(|arrow| {
    let rest = text.strip_prefix(arrow)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
      Some(rest.trim_start())
    } else {
      None
    }
  })
}

fn classify<'a>(line: &Line<'a>) -> Result<Entry<'a>, ParseError> {
  let (text, arrow) = match strip_arrow(line.text) {
    Some(rest) => (rest, true),
    None => (line.text, false),
  };

  if text.is_empty() {
    return Err(ParseError::BadNesting {
      line: line.number,
      detail: "arrow without a step".into(),
    });
  }

  if text.starts_with("If ") && text.ends_with(':') {
    let label = text.trim_end_matches(':').trim_end();
    return Ok(Entry::Label(label));
  }

  Ok(Entry::Step { text, arrow })
}

fn build_flow(name: String, lines: &[Line<'_>]) -> Result<Flow, ParseError> {
  let mut stack = vec![Frame::root()];

  for line in lines {
    let mut closed = false;
    while stack
      .last()
      .and_then(Frame::label_indent)
      .is_some_and(|label_indent| line.indent <= label_indent)
    {
      close_branch(&mut stack)?;
      closed = true;
    }

    let frame = stack.last_mut().ok_or(ParseError::MissingHeader)?;

    let dedented = closed || frame.last_indent.is_some_and(|last| line.indent < last);
    if dedented && !frame.levels.contains(&line.indent) {
      return Err(ParseError::BadNesting {
        line: line.number,
        detail: format!("indent {} matches no enclosing step", line.indent),
      });
    }

    match frame.body_indent {
      None => frame.body_indent = Some(line.indent),
      Some(body) if line.indent < body => {
        return Err(ParseError::BadNesting {
          line: line.number,
          detail: format!("indent {} is shallower than its sequence ({body})", line.indent),
        });
      }
      Some(_) => {}
    }
    if !frame.levels.contains(&line.indent) {
      frame.levels.push(line.indent);
    }
    frame.last_indent = Some(line.indent);

    match classify(line)? {
      Entry::Label(label) => {
        if frame.steps.is_empty() {
          return Err(ParseError::BadNesting {
            line: line.number,
            detail: format!("`{label}` has no step to branch from"),
          });
        }
        stack.push(Frame::branch(label, line.indent, line.number));
      }
      Entry::Step { text, arrow } => {
        if frame.label.is_none() && !arrow && !frame.steps.is_empty() {
          return Err(ParseError::MissingArrow { line: line.number });
        }
        frame.steps.push(Step::new(text));
      }
    }
  }

  while stack.len() > 1 {
    close_branch(&mut stack)?;
  }

  let root = stack.pop().ok_or(ParseError::MissingHeader)?;
  if root.steps.is_empty() {
    return Err(ParseError::EmptyFlow { name });
  }

  Ok(Flow {
    name,
    steps: root.steps,
  })
}

fn close_branch(stack: &mut Vec<Frame>) -> Result<(), ParseError> {
  if stack.last().map_or(true, |frame| frame.label.is_none()) {
    return Ok(());
  }
  let Some(Frame {
    label: Some((label, _, line)),
    steps,
    ..
  }) = stack.pop()
  else {
    return Ok(());
  };

  if steps.is_empty() {
    return Err(ParseError::EmptyBranch { line, label });
  }

  // A label is only pushed when its parent already holds a step.
  let owner = stack
    .last_mut()
    .and_then(|parent| parent.steps.last_mut())
    .ok_or_else(|| ParseError::BadNesting {
      line,
      detail: format!("`{label}` has no step to branch from"),
    })?;
  owner.branches.push(Branch::new(&label, steps));
  Ok(())
}
