use std::io::Write;

use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use serde_json::Value;

use crate::error::Result;
use crate::sql::QueryResult;

/// Longest cell rendered in table output; file contents get cut here.
const MAX_CELL_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Jsonl,
    Csv,
}

pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    header: bool,
}

impl<W: Write> OutputWriter<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            header: true,
        }
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn write_result(&mut self, result: &QueryResult) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&result.to_json_array())?;
                writeln!(self.writer, "{}", json)?;
            }
            OutputFormat::Jsonl => {
                for row in result.to_json_array() {
                    writeln!(self.writer, "{}", serde_json::to_string(&row)?)?;
                }
            }
            OutputFormat::Csv => self.write_csv(result)?,
            OutputFormat::Table => {
                if result.is_empty() {
                    writeln!(self.writer, "No results")?;
                    return Ok(());
                }
                let mut table = create_table();
                if self.header {
                    table.set_header(&result.columns);
                }
                for row in &result.rows {
                    table.add_row(row.iter().map(|v| truncate_string(&cell_text(v), MAX_CELL_CHARS)));
                }
                self.write_table(table)?;
            }
        }
        Ok(())
    }

    fn write_csv(&mut self, result: &QueryResult) -> Result<()> {
        let mut csv = csv::Writer::from_writer(&mut self.writer);
        if self.header {
            csv.write_record(&result.columns)?;
        }
        for row in &result.rows {
            csv.write_record(row.iter().map(cell_text))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn write_table(&mut self, table: Table) -> Result<()> {
        writeln!(self.writer, "{}", table)?;
        Ok(())
    }
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Plain-text rendering of a result cell. NULL renders empty.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars.saturating_sub(3)).collect::<String>())
    } else {
        s.to_string()
    }
}
