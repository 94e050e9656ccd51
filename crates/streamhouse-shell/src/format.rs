//! Output formatting for statement results
//!
//! Supports two output formats:
//! - Table: bordered table sized from the widest value per column (default)
//! - JSON: `{"columns": [...], "rows": [[...]]}`, one string or null per cell

use crate::config::OutputFormat;
use anyhow::Result;
use colored::*;
use serde_json::{json, Value};
use streamhouse_results::{Field, MaterializedResults};
use tabled::{builder::Builder, settings::Style};

/// Columns wider than this are truncated with an ellipsis
pub const MAX_COLUMN_WIDTH: usize = 50;

/// Format and print results based on configured format
pub struct Formatter {
    format: OutputFormat,
    colored: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    /// Render the current view of `results`
    pub fn render(&self, results: &MaterializedResults) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.render_table(results)),
            OutputFormat::Json => render_json(results),
        }
    }

    /// Print the current view of `results` followed by a row count summary
    pub fn print_results(&self, results: &MaterializedResults) -> Result<()> {
        println!("{}", self.render(results)?);
        if self.format == OutputFormat::Table {
            let mode = if results.is_table_mode() {
                "table"
            } else {
                "changelog"
            };
            self.print_info(&format!("{} row(s) in {} mode", results.size(), mode));
        }
        Ok(())
    }

    /// Print a success message
    pub fn print_success(&self, message: &str) {
        if self.colored {
            println!("{} {}", "✅".green(), message);
        } else {
            println!("✅ {}", message);
        }
    }

    /// Print an error message
    pub fn print_error(&self, message: &str) {
        if self.colored {
            eprintln!("{} {}", "❌".red(), message.red());
        } else {
            eprintln!("❌ {}", message);
        }
    }

    /// Print an info message
    pub fn print_info(&self, message: &str) {
        if self.colored {
            println!("{}", message.dimmed());
        } else {
            println!("{}", message);
        }
    }

    fn render_table(&self, results: &MaterializedResults) -> String {
        if results.size() == 0 {
            return "No rows".to_string();
        }

        let widths: Vec<usize> = results
            .max_width_per_column()
            .into_iter()
            .map(|w| w.min(MAX_COLUMN_WIDTH))
            .collect();

        let mut builder = Builder::default();
        builder.push_record(
            results
                .headers()
                .iter()
                .zip(&widths)
                .map(|(header, width)| truncate(header, *width)),
        );
        results.for_each(|_, row| {
            builder.push_record(
                row.fields
                    .iter()
                    .zip(&widths)
                    .map(|(field, width)| truncate(&field.to_string(), *width)),
            );
        });

        let mut table = builder.build();
        table.with(Style::rounded());
        table.to_string()
    }
}

fn render_json(results: &MaterializedResults) -> Result<String> {
    let mut rows = Vec::new();
    results.for_each(|_, row| {
        rows.push(Value::Array(row.fields.iter().map(field_to_json).collect()));
    });

    let document = json!({
        "columns": results.headers(),
        "rows": rows,
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

fn field_to_json(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

/// Cut `value` to `width` characters, marking the cut with "..."
fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let keep = width.saturating_sub(3);
    let mut cut: String = value.chars().take(keep).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamhouse_results::{FieldType, Operation, Row};

    fn sample() -> MaterializedResults {
        let results = MaterializedResults::new(vec!["id".to_string(), "name".to_string()], 10);
        results.append(vec![
            Row::new(
                Operation::Insert,
                vec![Field::atomic(FieldType::Integer, "1"), Field::varchar("alice")],
            ),
            Row::new(
                Operation::Insert,
                vec![Field::atomic(FieldType::Integer, "2"), Field::Null],
            ),
        ]);
        results
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly", 7), "exactly");
        assert_eq!(truncate("much too long", 8), "much ...");
        assert_eq!(truncate("äöüäöü", 5), "äö...");
    }

    #[test]
    fn test_table_rendering() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        let rendered = formatter.render(&sample()).unwrap();
        assert!(rendered.contains("id"));
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("NULL"));
        assert!(!rendered.contains("Operation"));
    }

    #[test]
    fn test_changelog_rendering_has_operation_column() {
        let results = sample();
        results.set_table_mode(false);
        let formatter = Formatter::new(OutputFormat::Table, false);
        let rendered = formatter.render(&results).unwrap();
        assert!(rendered.contains("Operation"));
        assert!(rendered.contains("+I"));
    }

    #[test]
    fn test_empty_results() {
        let results = MaterializedResults::new(vec!["id".to_string()], 10);
        let formatter = Formatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.render(&results).unwrap(), "No rows");
    }

    #[test]
    fn test_wide_values_are_truncated() {
        let results = MaterializedResults::new(vec!["payload".to_string()], 10);
        results.append(vec![Row::new(
            Operation::Insert,
            vec![Field::varchar("x".repeat(200))],
        )]);
        let formatter = Formatter::new(OutputFormat::Table, false);
        let rendered = formatter.render(&results).unwrap();
        assert!(rendered.contains(&format!("{}...", "x".repeat(MAX_COLUMN_WIDTH - 3))));
        assert!(!rendered.contains(&"x".repeat(MAX_COLUMN_WIDTH)));
    }

    #[test]
    fn test_json_rendering() {
        let formatter = Formatter::new(OutputFormat::Json, false);
        let rendered = formatter.render(&sample()).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["columns"], json!(["id", "name"]));
        assert_eq!(value["rows"][0], json!(["1", "alice"]));
        assert_eq!(value["rows"][1][1], Value::Null);
    }
}
