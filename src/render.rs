//! Purpose: Write query results to stdout as a table, JSON records, or CSV.
//! Exports: `emit_result`, `render_table`, `render_csv`.
//! Invariants: Column order in every format matches the result's column order.
//! Invariants: Table cells never span lines; NULL shows as `NULL` in tables and empty in CSV.
use std::io::{self, IsTerminal, Write};

use runsql::api::{Error, ErrorKind, QueryResult, Row, Scalar};

use crate::color_json::colorize_records;
use crate::{ColorMode, OutputFormat};

const HEADER_STYLE: &str = "1;36";

pub(super) fn emit_result(
    result: &QueryResult,
    format: OutputFormat,
    color_mode: ColorMode,
) -> Result<(), Error> {
    let is_tty = io::stdout().is_terminal();
    let use_color = color_mode.use_color(is_tty);
    let rendered = match format {
        OutputFormat::Table => render_table(&result.columns, &result.rows, use_color),
        OutputFormat::Json => {
            colorize_records(&result.columns, &result.rows, is_tty || use_color, use_color)
        }
        OutputFormat::Csv => render_csv(result)?,
    };

    let mut stdout = io::stdout().lock();
    let written = if rendered.is_empty() || rendered.ends_with('\n') {
        stdout.write_all(rendered.as_bytes())
    } else {
        writeln!(stdout, "{rendered}")
    };
    written.and_then(|()| stdout.flush()).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write query output")
            .with_source(err)
    })
}

/// Bordered grid:
///
/// ```text
/// +----+-------+
/// | id | name  |
/// +----+-------+
/// | 1  | Apple |
/// +----+-------+
/// ```
pub(super) fn render_table(columns: &[String], rows: &[Row], use_color: bool) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let mut widths: Vec<usize> = columns.iter().map(|name| name.chars().count()).collect();
    let mut cells = Vec::with_capacity(rows.len());
    for row in rows {
        let mut line = Vec::with_capacity(columns.len());
        for (idx, width) in widths.iter_mut().enumerate() {
            let cleaned = row.get(idx).map_or_else(String::new, table_cell);
            *width = (*width).max(cleaned.chars().count());
            line.push(cleaned);
        }
        cells.push(line);
    }

    let border = format_border(&widths);
    let mut lines = Vec::with_capacity(cells.len() + 4);
    lines.push(border.clone());
    lines.push(format_table_line(columns, &widths, use_color.then_some(HEADER_STYLE)));
    lines.push(border.clone());
    for line in &cells {
        lines.push(format_table_line(line, &widths, None));
    }
    if !cells.is_empty() {
        lines.push(border);
    }
    lines.join("\n")
}

pub(super) fn render_csv(result: &QueryResult) -> Result<String, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns).map_err(csv_error)?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(Scalar::to_string))
            .map_err(csv_error)?;
    }
    let bytes = writer.into_inner().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to finish csv output: {}", err.error()))
    })?;
    String::from_utf8(bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("csv output is not valid UTF-8")
            .with_source(err)
    })
}

fn table_cell(value: &Scalar) -> String {
    match value {
        Scalar::Null => "NULL".to_string(),
        other => sanitize_table_cell(&other.to_string()),
    }
}

fn sanitize_table_cell(value: &str) -> String {
    value
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', " ")
}

fn format_border(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

fn format_table_line(cells: &[String], widths: &[usize], style: Option<&str>) -> String {
    let mut line = String::from("|");
    for (idx, width) in widths.iter().enumerate() {
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        line.push(' ');
        match style {
            Some(code) => {
                line.push_str("\u{1b}[");
                line.push_str(code);
                line.push('m');
                line.push_str(cell);
                line.push_str("\u{1b}[0m");
            }
            None => line.push_str(cell),
        }
        let cell_len = cell.chars().count();
        if *width > cell_len {
            line.push_str(&" ".repeat(*width - cell_len));
        }
        line.push_str(" |");
    }
    line
}

fn csv_error(err: csv::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message(format!("failed to write csv output: {err}"))
        .with_source(err)
}
