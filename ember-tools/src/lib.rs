//! Ember Tools - the capabilities the model may invoke.
//!
//! The tool set is closed: every tool is a variant of [`Tool`], so name
//! resolution and argument checks are exhaustive. The [`ToolDispatcher`]
//! resolves a model-issued [`ember_common::ToolCall`], validates its arguments
//! against the tool's declared parameters, runs it and always answers with a
//! tool-result turn. Validation and execution failures become error results
//! the model can read and correct; they never abort a round.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod args;
pub mod dispatcher;
pub mod tool;
pub mod traits;

pub use args::{ArgError, ArgType, ParamSpec};
pub use dispatcher::ToolDispatcher;
pub use tool::{Tool, ToolInvocation};
pub use traits::{ToolResult, ToolSpec};
