//! Output formatting for CLI

use crate::error::CliResult;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Serialize `value` as JSON or YAML; tables are the caller's job
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Print rows as a table, or the rows themselves as JSON/YAML
pub fn print_rows<T: Serialize + Tabled>(rows: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "(none)".dimmed());
            } else {
                let table = Table::new(rows).with(Style::rounded()).to_string();
                println!("{table}");
            }
            Ok(())
        }
        _ => print_structured(&rows, format),
    }
}

pub fn print_header(title: &str) {
    println!("{}", title.bold().cyan());
    println!("{}", "=".repeat(60));
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{:<22} {}", format!("{label}:").bold(), value);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow().bold(), message.yellow());
}
