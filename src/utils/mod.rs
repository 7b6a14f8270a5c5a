//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Captured process output
//! - `shell` - Shell escaping and quoting
//! - `template` - String template rendering

pub mod command;
pub mod shell;
pub mod template;
