//! Output formatting utilities

use crate::error::{CliError, CliResult};
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for listing commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print rows in the requested format
pub fn print_output<T: Serialize + Tabled>(rows: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Json => println!("{}", to_json(&rows)?),
        OutputFormat::Yaml => println!("{}", to_yaml(&rows)?),
    }
    Ok(())
}

/// Print a single value; tables fall back to JSON
pub fn print_single<T: Serialize>(value: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => println!("{}", to_json(value)?),
        OutputFormat::Yaml => println!("{}", to_yaml(value)?),
    }
    Ok(())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))
}

fn to_yaml<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_yaml::to_string(value).map_err(|e| CliError::Output(e.to_string()))
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        assert!(matches!(OutputFormat::default(), OutputFormat::Table));
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = to_yaml(&serde_json::json!({"launched": 2})).unwrap();
        assert_eq!(yaml.trim(), "launched: 2");
    }
}
