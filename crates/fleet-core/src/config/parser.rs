//! TOML parser with helpful error messages

use super::schema::DaemonConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse fleet.toml with detailed error messages
pub fn parse_fleet_toml(path: &Path) -> Result<DaemonConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_fleet_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse fleet.toml content from string
pub fn parse_fleet_toml_str(content: &str) -> Result<DaemonConfig> {
    let config: DaemonConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    config.validate()?;

    Ok(config)
}

/// Prefix the error with the lines around the failing key.
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let Some(span) = error.span() else {
        return anyhow::anyhow!("TOML parsing error: {}", error);
    };

    let offset = span.start.min(content.len());
    let line = content.get(..offset).unwrap_or(content).matches('\n').count() + 1;
    anyhow::anyhow!(
        "TOML parsing error at line {}:\n{}\n\nError: {}",
        line,
        line_context(content, line),
        error
    )
}

/// One line of context on each side of `line` (1-based), the target marked `>>>`.
fn line_context(content: &str, line: usize) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .filter(|(num, _)| num.abs_diff(line) <= 1)
        .map(|(num, text)| {
            let marker = if num == line { ">>>" } else { "   " };
            format!("{marker} {num:4} | {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialize a configuration to TOML string
pub fn to_toml(config: &DaemonConfig) -> Result<String> {
    toml::to_string_pretty(config).with_context(|| "Failed to serialize configuration to TOML")
}
