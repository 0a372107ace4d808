//! Flow-driven validation: parse plain-text user flows, pick the path a run
//! takes through their branches, and drive each step against a live system.

pub mod config;
pub mod coverage;
pub mod driver;
pub mod error;
pub mod execute;
pub mod flow;
pub mod git;
pub mod pipeline;
pub mod resolve;
pub mod state;
