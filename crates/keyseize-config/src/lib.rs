//! Configuration parsing for keyseize
//!
//! This crate handles parsing the KDL configuration file and owns the table
//! of logical key code names shared by the daemon and the CLI.

mod error;
pub mod keys;
mod model;
mod parser;

pub use error::{ConfigError, InvalidKeyInfo, KeyPosition, SourceLocation};
pub use model::*;
pub use parser::{parse_config, parse_config_str};
