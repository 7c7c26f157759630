// Output formatting utilities for CLI commands.
// Provides unified formatting for the table, JSON and YAML output formats.

use anyhow::{Result, anyhow};
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Parse output format from string (case-insensitive).
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            _ => Err(anyhow!(
                "Unknown format: '{}'. Valid formats: table, json, yaml",
                s
            )),
        }
    }
}

/// Format data as JSON string.
pub fn format_json<T: Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data).map_err(|e| anyhow!("JSON serialization failed: {}", e))
}

/// Format data as YAML string.
pub fn format_yaml<T: Serialize>(data: &T) -> Result<String> {
    serde_yaml::to_string(data).map_err(|e| anyhow!("YAML serialization failed: {}", e))
}

/// Print data in the specified format to the provided writer.
///
/// For table format, uses the provided `table_printer` function.
/// For JSON/YAML, serializes the data and writes to the writer.
pub fn print_output<T, W, F>(
    writer: &mut W,
    data: &T,
    format: OutputFormat,
    table_printer: F,
) -> Result<()>
where
    T: Serialize,
    W: std::io::Write,
    F: FnOnce(&mut W, &T) -> Result<()>,
{
    match format {
        OutputFormat::Table => {
            table_printer(writer, data)?;
            Ok(())
        }
        OutputFormat::Json => {
            let json = format_json(data)?;
            writeln!(writer, "{}", json)?;
            Ok(())
        }
        OutputFormat::Yaml => {
            let yaml = format_yaml(data)?;
            writeln!(writer, "{}", yaml)?;
            Ok(())
        }
    }
}

/// Format time consistently.
///
/// Uses the format: `YYYY-MM-DD HH:MM:SS TZ` (e.g., `2026-01-22 15:04:05 UTC`)
pub fn format_time<T: chrono::TimeZone>(t: &chrono::DateTime<T>) -> String
where
    T::Offset: std::fmt::Display,
{
    t.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// Human-readable byte count, binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Placeholder for absent table cells.
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Create a standard table with vhdbranch styling.
pub fn create_table<T: Tabled>(data: impl IntoIterator<Item = T>) -> Table {
    let mut table = Table::new(data);
    table.with(Style::sharp());
    table
}
