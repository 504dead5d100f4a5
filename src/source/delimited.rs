//! Purpose: Comma-delimited text as a `Source`.
//! Exports: `DelimitedSource`.
//! Role: First record becomes the header list; remaining records stream as text cells.
//! Invariants: Ragged records are accepted and fitted to the header width.
//! Invariants: Mid-stream faults obey the configured `ErrorPolicy`; I/O failures always stop.
use std::io::Read;

use csv::{Reader, ReaderBuilder, StringRecord};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Scalar, fit_row};
use crate::source::stream::{RowStream, handoff, spawn_producer};
use crate::source::{ErrorPolicy, SourceOptions};

type BoxedReader = Box<dyn Read + Send>;

pub struct DelimitedSource {
    label: String,
    headers: Vec<String>,
    reader: Reader<BoxedReader>,
    errors: ErrorPolicy,
}

impl DelimitedSource {
    pub fn new<R>(label: &str, reader: R, options: SourceOptions) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        let boxed: BoxedReader = Box::new(reader);
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(boxed);

        let mut record = StringRecord::new();
        let found = reader
            .read_record(&mut record)
            .map_err(|err| record_error(err, label, "failed to read header row"))?;
        if !found {
            return Err(Error::new(ErrorKind::Parse)
                .with_message("missing header row")
                .with_path(label));
        }
        let headers: Vec<String> = record.iter().map(str::to_string).collect();
        debug!(source = label, columns = headers.len(), "read delimited header");

        Ok(Self {
            label: label.to_string(),
            headers,
            reader,
            errors: options.errors,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn read(self) -> Result<RowStream, Error> {
        let Self {
            label,
            headers,
            mut reader,
            errors,
        } = self;
        let width = headers.len();
        let (sink, rx) = handoff(&label);
        let producer_label = label.clone();
        let producer = spawn_producer(&label, move || {
            let mut record = StringRecord::new();
            let mut index = 0u64;
            loop {
                index += 1;
                match reader.read_record(&mut record) {
                    Ok(false) => return,
                    Ok(true) => {
                        let row = record.iter().map(Scalar::from).collect();
                        if !sink.row(fit_row(row, width)) {
                            return;
                        }
                    }
                    Err(err) if err.is_io_error() => {
                        sink.fail(
                            record_error(err, &producer_label, "failed to read record")
                                .with_record(index),
                        );
                        return;
                    }
                    Err(err) => {
                        let err = record_error(err, &producer_label, "malformed record")
                            .with_record(index);
                        if !sink.reject(errors, index, err) {
                            return;
                        }
                    }
                }
            }
        })?;
        Ok(RowStream::new(&label, rx, producer))
    }
}

fn record_error(err: csv::Error, label: &str, context: &str) -> Error {
    let kind = if err.is_io_error() {
        ErrorKind::Io
    } else {
        ErrorKind::Parse
    };
    Error::new(kind)
        .with_message(format!("{context}: {err}"))
        .with_path(label)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::DelimitedSource;
    use crate::core::error::ErrorKind;
    use crate::core::value::Scalar;
    use crate::source::{ErrorPolicy, SourceOptions};
    use std::io::Cursor;

    fn open(input: &'static [u8], errors: ErrorPolicy) -> DelimitedSource {
        DelimitedSource::new(
            "input.csv",
            Cursor::new(input),
            SourceOptions::default().with_errors(errors),
        )
        .expect("source")
    }

    #[test]
    fn header_then_text_rows() {
        let source = open(b"id,name\n1,Apple\n2,Banana\n", ErrorPolicy::Stop);
        assert_eq!(source.headers(), ["id", "name"]);
        let rows = source
            .read()
            .expect("read")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(
            rows,
            vec![
                vec![Scalar::from("1"), Scalar::from("Apple")],
                vec![Scalar::from("2"), Scalar::from("Banana")],
            ]
        );
    }

    #[test]
    fn ragged_records_are_fitted() {
        let source = open(b"a,b,c\n1\n1,2,3,4,5\n\"x,y\",z\n", ErrorPolicy::Stop);
        let rows = source
            .read()
            .expect("read")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.len() == 3));
        assert_eq!(rows[0], vec![Scalar::from("1"), Scalar::empty(), Scalar::empty()]);
        assert_eq!(rows[1][2], Scalar::from("3"));
        assert_eq!(rows[2][0], Scalar::from("x,y"));
    }

    #[test]
    fn empty_input_has_no_header() {
        let err = DelimitedSource::new("empty.csv", Cursor::new(&b""[..]), SourceOptions::default())
            .err()
            .expect("error");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.message(), Some("missing header row"));
    }

    #[test]
    fn stop_policy_ends_with_indexed_error() {
        let source = open(b"id,name\n1,ok\n2,\xff\xfe\n3,fine\n", ErrorPolicy::Stop);
        let mut stream = source.read().expect("read");
        assert!(stream.next().expect("first").is_ok());
        let err = stream.next().expect("second").expect_err("fault");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.record(), Some(2));
        assert!(stream.next().is_none());
    }

    #[test]
    fn skip_policy_drops_bad_record() {
        let source = open(b"id,name\n1,ok\n2,\xff\xfe\n3,fine\n", ErrorPolicy::Skip);
        let mut stream = source.read().expect("read");
        let rows = stream
            .by_ref()
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Scalar::from("3"));
        assert_eq!(stream.faults().len(), 1);
        assert_eq!(stream.faults()[0].record, 2);
        assert_eq!(stream.faults()[0].source, "input.csv");
    }
}
