//! Purpose: Uniform tabular sources over delimited text, JSON record arrays, and spreadsheets.
//! Exports: `Source`, `SourceFormat`, `SourceOptions`, `ErrorPolicy`, `RowStream`, `RowFault`.
//! Role: Turns one input file into a header list plus a one-pass lazy row sequence.
//! Invariants: Headers are resolved at construction, before any row is read.
//! Invariants: Every yielded row has exactly `headers().len()` cells.
//! Invariants: A source is consumed by `read`; re-reading requires reopening the file.
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::core::error::{Error, ErrorKind};

mod delimited;
mod records;
mod sheet;
mod stream;

pub use delimited::DelimitedSource;
pub use records::RecordSource;
pub use sheet::SheetSource;
pub use stream::{RowFault, RowStream};
#[cfg(test)]
pub(crate) use stream::MAX_RECORDED_FAULTS;

/// What to do with a malformed record found mid-stream.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// End the sequence with an error; the load is aborted.
    #[default]
    Stop,
    /// Drop the record, report it as a `RowFault`, and continue.
    Skip,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SourceOptions {
    pub errors: ErrorPolicy,
}

impl SourceOptions {
    pub fn with_errors(mut self, errors: ErrorPolicy) -> Self {
        self.errors = errors;
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SourceFormat {
    Delimited,
    Records,
    Sheet,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(SourceFormat::Delimited),
            "json" => Some(SourceFormat::Records),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(SourceFormat::Sheet),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| {
            let message = if ext.is_empty() {
                "file has no extension".to_string()
            } else {
                format!("unsupported file type: .{ext}")
            };
            Error::new(ErrorKind::Usage)
                .with_message(message)
                .with_path(path)
                .with_hint("Supported inputs are .csv, .json, and .xlsx.")
        })
    }
}

pub enum Source {
    Delimited(DelimitedSource),
    Records(RecordSource),
    Sheet(SheetSource),
}

impl Source {
    pub fn open_path(path: impl AsRef<Path>, options: SourceOptions) -> Result<Self, Error> {
        let path = path.as_ref();
        let format = SourceFormat::from_path(path)?;
        let label = path.display().to_string();
        match format {
            SourceFormat::Delimited | SourceFormat::Records => {
                let file = File::open(path).map_err(|err| open_error(err, &label))?;
                Self::open_reader(format, &label, file, options)
            }
            SourceFormat::Sheet => {
                let bytes = fs::read(path).map_err(|err| open_error(err, &label))?;
                Ok(Source::Sheet(SheetSource::from_bytes(&label, bytes)?))
            }
        }
    }

    /// Open an in-memory upload. `label` names the source in errors.
    pub fn open_bytes(
        format: SourceFormat,
        label: &str,
        bytes: Vec<u8>,
        options: SourceOptions,
    ) -> Result<Self, Error> {
        match format {
            SourceFormat::Sheet => Ok(Source::Sheet(SheetSource::from_bytes(label, bytes)?)),
            _ => Self::open_reader(format, label, io::Cursor::new(bytes), options),
        }
    }

    pub fn open_reader<R>(
        format: SourceFormat,
        label: &str,
        mut reader: R,
        options: SourceOptions,
    ) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        match format {
            SourceFormat::Delimited => Ok(Source::Delimited(DelimitedSource::new(
                label, reader, options,
            )?)),
            SourceFormat::Records => {
                Ok(Source::Records(RecordSource::new(label, reader, options)?))
            }
            SourceFormat::Sheet => {
                let mut bytes = Vec::new();
                reader
                    .read_to_end(&mut bytes)
                    .map_err(|err| open_error(err, label))?;
                Ok(Source::Sheet(SheetSource::from_bytes(label, bytes)?))
            }
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            Source::Delimited(_) => SourceFormat::Delimited,
            Source::Records(_) => SourceFormat::Records,
            Source::Sheet(_) => SourceFormat::Sheet,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Source::Delimited(source) => source.label(),
            Source::Records(source) => source.label(),
            Source::Sheet(source) => source.label(),
        }
    }

    pub fn headers(&self) -> &[String] {
        match self {
            Source::Delimited(source) => source.headers(),
            Source::Records(source) => source.headers(),
            Source::Sheet(source) => source.headers(),
        }
    }

    /// Start the row sequence. Consumes the source.
    pub fn read(self) -> Result<RowStream, Error> {
        match self {
            Source::Delimited(source) => source.read(),
            Source::Records(source) => Ok(source.read()),
            Source::Sheet(source) => source.read(),
        }
    }
}

fn open_error(err: io::Error, label: &str) -> Error {
    let kind = if err.kind() == io::ErrorKind::NotFound {
        ErrorKind::NotFound
    } else {
        ErrorKind::Io
    };
    Error::new(kind)
        .with_message("failed to open input file")
        .with_path(label)
        .with_source(err)
}
