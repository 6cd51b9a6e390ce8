//! Built-in native core tools
//!
//! Tools that run on the host rather than inside the interpreter.

pub mod terminal;

pub use terminal::{CommandOutput, TerminalTool};
