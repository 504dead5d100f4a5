//! Purpose: The active worksheet of a spreadsheet workbook as a `Source`.
//! Exports: `SheetSource`.
//! Role: Decodes the workbook at open, then streams the sheet body row by row.
//! Invariants: The first row is the header row; a sheet with no rows fails at open.
//! Invariants: Short rows are padded with empty text; cells past the header width are dropped.
use std::io::{Cursor, Read};
use std::sync::LazyLock;

use calamine::{Data, DataType, Range, Reader, open_workbook_auto_from_rs};
use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Row, Scalar, fit_row};
use crate::source::stream::{RowStream, handoff, spawn_producer};

static ACTIVE_TAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:\w+:)?workbookView\b[^>]*\bactiveTab="([0-9]+)""#)
        .expect("activeTab pattern")
});

pub struct SheetSource {
    label: String,
    sheet: String,
    headers: Vec<String>,
    range: Range<Data>,
}

impl SheetSource {
    pub fn from_bytes(label: &str, bytes: Vec<u8>) -> Result<Self, Error> {
        let active = active_tab(&bytes).unwrap_or(0);
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|err| sheet_error(err, label, "failed to open workbook"))?;

        let names = workbook.sheet_names();
        let Some(sheet) = names.get(active).or_else(|| names.first()).cloned() else {
            return Err(Error::new(ErrorKind::Parse)
                .with_message("workbook has no sheets")
                .with_path(label));
        };
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|err| sheet_error(err, label, "failed to read sheet"))?;
        debug!(source = label, sheet = %sheet, index = active, "opened active sheet");

        Self::from_range(label, &sheet, range)
    }

    pub(crate) fn from_range(label: &str, sheet: &str, range: Range<Data>) -> Result<Self, Error> {
        let Some(first) = range.rows().next() else {
            return Err(Error::new(ErrorKind::Parse)
                .with_message(format!("sheet '{sheet}' is empty"))
                .with_path(label));
        };
        // The range spans the widest row; the header row ends at its last filled cell.
        let used = first
            .iter()
            .rposition(|cell| !matches!(cell, Data::Empty))
            .map_or(0, |last| last + 1);
        let headers = first[..used].iter().map(header_text).collect();
        Ok(Self {
            label: label.to_string(),
            sheet: sheet.to_string(),
            headers,
            range,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn read(self) -> Result<RowStream, Error> {
        let Self {
            label,
            headers,
            range,
            ..
        } = self;
        let width = headers.len();
        let (sink, rx) = handoff(&label);
        let producer = spawn_producer(&label, move || {
            for cells in range.rows().skip(1) {
                let row: Row = cells.iter().take(width).map(scalar_from_cell).collect();
                if !sink.row(fit_row(row, width)) {
                    return;
                }
            }
        })?;
        Ok(RowStream::new(&label, rx, producer))
    }
}

/// Index of the workbook's active tab, when the file is an OOXML package that
/// records one.
fn active_tab(bytes: &[u8]) -> Option<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut entry = archive.by_name("xl/workbook.xml").ok()?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).ok()?;
    let captures = ACTIVE_TAB.captures(&xml)?;
    captures.get(1)?.as_str().parse().ok()
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => scalar_from_cell(other).to_string(),
    }
}

fn scalar_from_cell(cell: &Data) -> Scalar {
    match cell {
        Data::Empty => Scalar::empty(),
        Data::Int(value) => Scalar::Integer(*value),
        Data::Float(value) => Scalar::Real(*value),
        Data::String(value) => Scalar::text(value.as_str()),
        Data::Bool(value) => Scalar::text(if *value { "TRUE" } else { "FALSE" }),
        Data::DateTime(_) => cell
            .as_datetime()
            .map_or_else(|| Scalar::text(cell.to_string()), |when| Scalar::text(when.to_string())),
        other => Scalar::text(other.to_string()),
    }
}

fn sheet_error(err: impl std::error::Error + Send + Sync + 'static, label: &str, context: &str) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message(format!("{context}: {err}"))
        .with_path(label)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{SheetSource, active_tab};
    use crate::core::error::ErrorKind;
    use crate::core::value::Scalar;
    use calamine::{Data, Range};

    fn range(cells: &[&[Data]]) -> Range<Data> {
        let rows = cells.len() as u32;
        let cols = cells.iter().map(|row| row.len()).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (rows - 1, cols - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    #[test]
    fn first_row_is_header_and_rows_are_padded() {
        let sheet = range(&[
            &[Data::String("id".into()), Data::String("name".into())],
            &[Data::Float(1.0), Data::String("Apple".into())],
            &[Data::Int(2)],
        ]);
        let source = SheetSource::from_range("book.xlsx", "Sheet1", sheet).expect("source");
        assert_eq!(source.headers(), ["id", "name"]);
        assert_eq!(source.sheet(), "Sheet1");
        let rows = source
            .read()
            .expect("read")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(
            rows,
            vec![
                vec![Scalar::Real(1.0), Scalar::from("Apple")],
                vec![Scalar::Integer(2), Scalar::empty()],
            ]
        );
    }

    #[test]
    fn cells_past_header_width_are_dropped() {
        let sheet = range(&[
            &[Data::String("only".into())],
            &[Data::Bool(true), Data::String("extra".into())],
        ]);
        let source = SheetSource::from_range("book.xlsx", "Sheet1", sheet).expect("source");
        let rows = source
            .read()
            .expect("read")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows, vec![vec![Scalar::from("TRUE")]]);
    }

    #[test]
    fn wide_data_rows_do_not_widen_the_header() {
        let sheet = range(&[
            &[Data::String("id".into()), Data::String("name".into())],
            &[
                Data::Float(1.0),
                Data::String("Apple".into()),
                Data::String("stray".into()),
            ],
        ]);
        let source = SheetSource::from_range("book.xlsx", "Sheet1", sheet).expect("source");
        assert_eq!(source.headers(), ["id", "name"]);
        let rows = source
            .read()
            .expect("read")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows, vec![vec![Scalar::Real(1.0), Scalar::from("Apple")]]);
    }

    #[test]
    fn empty_sheet_fails_at_open() {
        let err = SheetSource::from_range("book.xlsx", "Blank", Range::empty())
            .err()
            .expect("error");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.message().unwrap().contains("Blank"));
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let err = SheetSource::from_bytes("book.xlsx", b"not a workbook".to_vec())
            .err()
            .expect("error");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(active_tab(b"not a workbook").is_none());
    }
}
