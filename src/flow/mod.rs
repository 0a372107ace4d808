pub mod model;
pub mod parser;
pub mod registry;
pub mod render;

pub use model::{Branch, Flow, Step, StepKind};
pub use parser::{parse_document, parse_flow};
pub use render::render;
