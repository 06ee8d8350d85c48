//! CLI command implementations.
//!
//! Each submodule implements a healer CLI command with pure core logic
//! separated from IO for testability.

pub mod clean;
pub mod format;
pub mod run;
pub mod serve;
pub mod status;
