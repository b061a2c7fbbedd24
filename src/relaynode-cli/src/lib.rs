//! relaynode CLI library.

pub mod cli;
pub mod update_cmd;

pub use cli::{Cli, Commands, LogLevel};
