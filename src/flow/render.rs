use std::fmt::Write;

use crate::flow::model::{Flow, Step};

const STEP_INDENT: usize = 2;
const BRANCH_INDENT: usize = 4;

/// Renders a flow in canonical arrow notation. The output parses back to an
/// equal `Flow`.
pub fn render(flow: &Flow) -> String {
  let mut out = format!("Flow: {}\n", flow.name);
  render_steps(&mut out, &flow.steps, STEP_INDENT);
  out
}

fn render_steps(out: &mut String, steps: &[Step], indent: usize) {
  let pad = " ".repeat(indent);
  for step in steps {
    let _ = writeln!(out, "{pad}→ {}", step.description);
    for branch in &step.branches {
      let _ = writeln!(out, "{pad}→ {}:", branch.label);
      render_steps(out, &branch.steps, indent + BRANCH_INDENT);
    }
  }
}
