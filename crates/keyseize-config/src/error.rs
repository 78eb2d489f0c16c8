use miette::Diagnostic;
use thiserror::Error;

/// Position of a 1-indexed location in the configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub len: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize, len: usize) -> Self {
        Self {
            line,
            column,
            offset,
            len,
        }
    }
}

/// Which side of a modification an unknown key appeared on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPosition {
    From,
    To,
}

/// An unknown key name found while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKeyInfo {
    pub key: String,
    pub position: KeyPosition,
    pub location: SourceLocation,
}

impl std::fmt::Display for InvalidKeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.position {
            KeyPosition::From => "from",
            KeyPosition::To => "to",
        };
        write!(
            f,
            "'{}' ({} key) at line {}, column {}",
            self.key, side, self.location.line, self.location.column
        )
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(keyseize::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(keyseize::config::invalid))]
    Invalid { message: String },

    #[error("Unknown key name(s) in simple-modifications: {}", format_invalid_keys(.invalid_keys))]
    #[diagnostic(
        code(keyseize::config::unknown_key),
        help("key names follow HID keyboard usages, e.g. caps_lock, escape, left_control, or a raw 0x.. code")
    )]
    InvalidKeys {
        #[source_code]
        src: String,
        invalid_keys: Vec<InvalidKeyInfo>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_invalid_keys(keys: &[InvalidKeyInfo]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
