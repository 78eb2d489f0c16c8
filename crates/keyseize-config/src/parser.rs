//! KDL configuration parser

use std::path::Path;

use crate::error::{ConfigError, InvalidKeyInfo, KeyPosition, SourceLocation};
use crate::keys::is_valid_key;
use crate::model::*;

/// Extract source location from a KDL node's name span
fn get_node_location(node: &kdl::KdlNode, source: &str) -> SourceLocation {
    let span = node.name().span();
    let (line, column) = offset_to_line_col(source, span.offset());
    SourceLocation::new(line, column, span.offset(), span.len())
}

/// Extract source location from a KDL entry (for "to" values)
fn get_entry_location(entry: &kdl::KdlEntry, source: &str) -> SourceLocation {
    let span = entry.span();
    let (line, column) = offset_to_line_col(source, span.offset());
    SourceLocation::new(line, column, span.offset(), span.len())
}

/// Convert byte offset to line and column (1-indexed)
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Parse a configuration file from the given path.
///
/// A missing file is not an error: the daemon runs with defaults.
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl depends on an older miette, so the span is rebuilt by hand
        let span = miette::SourceSpan::from((e.span.offset(), e.span.len()));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "devices" => {
                config.devices = parse_devices(node)?;
            }
            "simple-modifications" => {
                config
                    .simple_modifications
                    .extend(parse_simple_modifications(node, content)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "grab-retry-interval-ms" => {
                    let ms = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_i64())
                        .ok_or_else(|| ConfigError::Invalid {
                            message: "grab-retry-interval-ms expects an integer".to_string(),
                        })?;
                    if ms <= 0 {
                        return Err(ConfigError::Invalid {
                            message: format!("grab-retry-interval-ms must be positive, got {}", ms),
                        });
                    }
                    global.grab_retry_interval_ms = ms as u64;
                }
                "synthetic-manufacturer" => {
                    if let Some(val) = first_string(child) {
                        global.synthetic_manufacturer = val.to_string();
                    }
                }
                "virtual-device-name" => {
                    if let Some(val) = first_string(child) {
                        global.virtual_device_name = val.to_string();
                    }
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_devices(node: &kdl::KdlNode) -> Result<DeviceMatchConfig, ConfigError> {
    let mut classes = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "match" => {
                    let class_name = first_string(child).ok_or_else(|| ConfigError::Invalid {
                        message: "`match` expects a device class name".to_string(),
                    })?;
                    let class: DeviceClass = class_name
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                    if !classes.contains(&class) {
                        classes.push(class);
                    }
                }
                name => {
                    tracing::warn!("Unknown devices option: {}", name);
                }
            }
        }
    }

    if classes.is_empty() {
        return Err(ConfigError::Invalid {
            message: "`devices` block must contain at least one `match` entry".to_string(),
        });
    }

    Ok(DeviceMatchConfig { classes })
}

fn parse_simple_modifications(
    node: &kdl::KdlNode,
    source: &str,
) -> Result<Vec<SimpleModification>, ConfigError> {
    let mut modifications = Vec::new();
    let mut invalid_keys = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let from_key = child.name().value().to_string();

            if !is_valid_key(&from_key) {
                invalid_keys.push(InvalidKeyInfo {
                    key: from_key.clone(),
                    position: KeyPosition::From,
                    location: get_node_location(child, source),
                });
            }

            let Some(entry) = child.entries().first() else {
                return Err(ConfigError::Invalid {
                    message: format!("simple modification for '{}' has no target key", from_key),
                });
            };

            if let Some(to_key) = entry.value().as_string() {
                if !is_valid_key(to_key) {
                    invalid_keys.push(InvalidKeyInfo {
                        key: to_key.to_string(),
                        position: KeyPosition::To,
                        location: get_entry_location(entry, source),
                    });
                }
                modifications.push(SimpleModification {
                    from: from_key,
                    to: to_key.to_string(),
                });
            }
        }
    }

    if !invalid_keys.is_empty() {
        return Err(ConfigError::InvalidKeys {
            src: source.to_string(),
            invalid_keys,
        });
    }

    Ok(modifications)
}
