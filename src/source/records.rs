//! Purpose: A top-level JSON array of objects as a `Source`.
//! Exports: `RecordSource`.
//! Role: Streams array elements one at a time; never buffers the whole document.
//! Invariants: Headers are the first object's keys in lexicographic order.
//! Invariants: Keys missing from a later object yield `Null`; unknown keys are ignored.
//! Invariants: Syntax errors always stop the stream (the parser cannot resynchronize);
//! well-formed non-object elements obey the `ErrorPolicy`.
use std::fmt;
use std::io::{BufReader, Read};
use std::sync::mpsc::{self, SyncSender};

use serde::de::{self, Deserializer as _, SeqAccess, Visitor};
use serde_json::error::Category;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Row, Scalar};
use crate::source::stream::{RowSink, RowStream, handoff, spawn_producer};
use crate::source::{ErrorPolicy, SourceOptions};

type HeaderResult = Result<Vec<String>, Error>;

pub struct RecordSource {
    label: String,
    headers: Vec<String>,
    stream: RowStream,
}

impl RecordSource {
    /// Starts the parser immediately and waits for the first element (or the
    /// end of an empty array) so the header list is known up front.
    pub fn new<R>(label: &str, reader: R, options: SourceOptions) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        let (sink, rx) = handoff(label);
        let (header_tx, header_rx) = mpsc::sync_channel::<HeaderResult>(1);
        let mut producer = Producer {
            label: label.to_string(),
            errors: options.errors,
            header_tx: Some(header_tx),
            sink,
            headers: Vec::new(),
            pending: None,
            halted: false,
        };
        let handle = spawn_producer(label, move || producer.run(reader))?;
        let stream = RowStream::new(label, rx, handle);

        let headers = match header_rx.recv() {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::new(ErrorKind::Internal)
                    .with_message("record reader exited before resolving headers")
                    .with_path(label));
            }
        };
        debug!(source = label, columns = headers.len(), "resolved record headers");

        Ok(Self {
            label: label.to_string(),
            headers,
            stream,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn read(self) -> RowStream {
        self.stream
    }
}

struct Producer {
    label: String,
    errors: ErrorPolicy,
    header_tx: Option<SyncSender<HeaderResult>>,
    sink: RowSink,
    headers: Vec<String>,
    // Set by the visitor for failures it raises itself.
    pending: Option<Error>,
    // Set once the outcome has been reported or the consumer hung up.
    halted: bool,
}

impl Producer {
    fn run<R: Read>(&mut self, reader: R) {
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
        let result = (&mut de)
            .deserialize_any(ArrayVisitor { state: &mut *self })
            .and_then(|()| de.end());
        match result {
            Ok(()) => {
                // An empty array never produced a first record.
                if let Some(tx) = self.header_tx.take() {
                    let _ = tx.send(Ok(Vec::new()));
                }
            }
            Err(err) => {
                if let Some(pending) = self.pending.take() {
                    self.report(pending);
                } else if !self.halted {
                    let err = json_error(err, &self.label);
                    self.report(err);
                }
            }
        }
    }

    fn report(&mut self, err: Error) {
        match self.header_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => self.sink.fail(err),
        }
    }

    /// Returns false when the parser should stop.
    fn accept(&mut self, index: u64, element: Value) -> bool {
        let record = match element {
            Value::Object(record) => record,
            other => return self.reject(index, &other),
        };

        if let Some(tx) = self.header_tx.take() {
            let mut headers: Vec<String> = record.keys().cloned().collect();
            headers.sort();
            self.headers = headers.clone();
            if tx.send(Ok(headers)).is_err() {
                self.halted = true;
                return false;
            }
        }

        let row = map_record(&self.headers, record);
        if self.sink.row(row) {
            return true;
        }
        self.halted = true;
        false
    }

    fn reject(&mut self, index: u64, element: &Value) -> bool {
        let err = Error::new(ErrorKind::Parse)
            .with_message(format!(
                "record {index} is not an object (found {})",
                json_type_name(element)
            ))
            .with_path(self.label.as_str())
            .with_record(index);
        if self.header_tx.is_some() {
            // Without a first object there is no header list to map onto.
            self.pending = Some(err);
            return false;
        }
        if self.sink.reject(self.errors, index, err) {
            return true;
        }
        self.halted = true;
        false
    }
}

struct ArrayVisitor<'a> {
    state: &'a mut Producer,
}

impl<'de> Visitor<'de> for ArrayVisitor<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a top-level JSON array of objects")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut index = 0u64;
        while let Some(element) = seq.next_element::<Value>()? {
            index += 1;
            if !self.state.accept(index, element) {
                return Err(de::Error::custom("record stream stopped"));
            }
        }
        Ok(())
    }
}

fn map_record(headers: &[String], mut record: Map<String, Value>) -> Row {
    headers
        .iter()
        .map(|key| record.remove(key).map_or(Scalar::Null, scalar_from_json))
        .collect()
}

fn scalar_from_json(value: Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(flag) => Scalar::text(if flag { "true" } else { "false" }),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Scalar::Integer(int),
            None => number
                .as_f64()
                .map_or_else(|| Scalar::text(number.to_string()), Scalar::Real),
        },
        Value::String(text) => Scalar::Text(text),
        nested @ (Value::Array(_) | Value::Object(_)) => Scalar::Text(nested.to_string()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn json_error(err: serde_json::Error, label: &str) -> Error {
    let (kind, context) = match err.classify() {
        Category::Io => (ErrorKind::Io, "failed to read JSON input"),
        Category::Data => (ErrorKind::Parse, "expected a top-level JSON array"),
        Category::Eof => (ErrorKind::Parse, "unexpected end of JSON input"),
        Category::Syntax => (ErrorKind::Parse, "invalid JSON"),
    };
    Error::new(kind)
        .with_message(format!("{context}: {err}"))
        .with_path(label)
        .with_source(err)
}
