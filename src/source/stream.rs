//! Purpose: Hand rows from a per-source producer thread to the loader.
//! Exports: `RowStream`, `RowFault` (crate-internal: `RowSink`, `handoff`, `spawn_producer`).
//! Role: The lazy, single-pass row sequence behind every `Source`.
//! Invariants: The handoff channel is bounded; a producer never runs more than
//! `ROW_HANDOFF_CAPACITY` rows ahead of the consumer.
//! Invariants: Dropping the stream disconnects the channel and joins the producer,
//! so a producer never outlives its consumer.
//! Invariants: Rows arrive in source order; a `Failed` item is always the last item.
//! Invariants: At most `MAX_RECORDED_FAULTS` faults are kept; `skipped` counts all of them.
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::Row;
use crate::source::ErrorPolicy;

const ROW_HANDOFF_CAPACITY: usize = 16;
pub(crate) const MAX_RECORDED_FAULTS: usize = 1000;

/// A record that was dropped under `ErrorPolicy::Skip`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowFault {
    pub source: String,
    pub record: u64,
    pub message: String,
}

pub(crate) enum Handoff {
    Row(Row),
    Fault(RowFault),
    Failed(Error),
}

pub(crate) struct RowSink {
    tx: SyncSender<Handoff>,
    source: String,
}

impl RowSink {
    /// Returns false once the consumer has hung up.
    pub(crate) fn row(&self, row: Row) -> bool {
        self.tx.send(Handoff::Row(row)).is_ok()
    }

    pub(crate) fn fail(&self, err: Error) {
        let _ = self.tx.send(Handoff::Failed(err));
    }

    /// Apply the error policy to a bad record. Returns true when the producer
    /// should keep going.
    pub(crate) fn reject(&self, policy: ErrorPolicy, record: u64, err: Error) -> bool {
        match policy {
            ErrorPolicy::Stop => {
                self.fail(err);
                false
            }
            ErrorPolicy::Skip => {
                let message = err.message().unwrap_or("malformed record").to_string();
                let fault = RowFault {
                    source: self.source.clone(),
                    record,
                    message,
                };
                self.tx.send(Handoff::Fault(fault)).is_ok()
            }
        }
    }
}

pub(crate) fn handoff(source: &str) -> (RowSink, Receiver<Handoff>) {
    let (tx, rx) = mpsc::sync_channel(ROW_HANDOFF_CAPACITY);
    let sink = RowSink {
        tx,
        source: source.to_string(),
    };
    (sink, rx)
}

pub(crate) fn spawn_producer<F>(source: &str, produce: F) -> Result<JoinHandle<()>, Error>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("runsql-read:{source}"))
        .spawn(produce)
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start row producer")
                .with_path(source)
                .with_source(err)
        })
}

pub struct RowStream {
    source: String,
    rx: Option<Receiver<Handoff>>,
    producer: Option<JoinHandle<()>>,
    faults: Vec<RowFault>,
    skipped: u64,
    finished: bool,
}

impl RowStream {
    pub(crate) fn new(source: &str, rx: Receiver<Handoff>, producer: JoinHandle<()>) -> Self {
        Self {
            source: source.to_string(),
            rx: Some(rx),
            producer: Some(producer),
            faults: Vec::new(),
            skipped: 0,
            finished: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The first skipped records, up to `MAX_RECORDED_FAULTS`.
    pub fn faults(&self) -> &[RowFault] {
        &self.faults
    }

    /// Every record skipped so far, including those past the recorded cap.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn take_faults(&mut self) -> Vec<RowFault> {
        std::mem::take(&mut self.faults)
    }

    fn finish(&mut self) -> Option<Error> {
        self.finished = true;
        self.rx = None;
        let producer = self.producer.take()?;
        match producer.join() {
            Ok(()) => None,
            Err(_) => Some(
                Error::new(ErrorKind::Internal)
                    .with_message("row producer panicked")
                    .with_path(self.source.as_str()),
            ),
        }
    }
}

impl Iterator for RowStream {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let received = self.rx.as_ref().map(Receiver::recv);
            match received {
                Some(Ok(Handoff::Row(row))) => return Some(Ok(row)),
                Some(Ok(Handoff::Fault(fault))) => {
                    warn!(
                        source = %fault.source,
                        record = fault.record,
                        "skipped record: {}",
                        fault.message
                    );
                    self.skipped += 1;
                    if self.faults.len() < MAX_RECORDED_FAULTS {
                        self.faults.push(fault);
                    }
                }
                Some(Ok(Handoff::Failed(err))) => {
                    self.finish();
                    return Some(Err(err));
                }
                Some(Err(_)) | None => return self.finish().map(Err),
            }
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on send wakes up and exits.
        self.rx = None;
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_RECORDED_FAULTS, RowStream, handoff, spawn_producer};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::value::Scalar;
    use crate::source::ErrorPolicy;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stream_of<F>(produce: F) -> RowStream
    where
        F: FnOnce(super::RowSink) + Send + 'static,
    {
        let (sink, rx) = handoff("test");
        let producer = spawn_producer("test", move || produce(sink)).expect("spawn");
        RowStream::new("test", rx, producer)
    }

    #[test]
    fn preserves_order_and_ends() {
        let rows = stream_of(|sink| {
            for idx in 0..100 {
                if !sink.row(vec![Scalar::Integer(idx)]) {
                    return;
                }
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
        assert_eq!(rows.len(), 100);
        assert!(
            rows.iter()
                .enumerate()
                .all(|(idx, row)| row[0] == Scalar::Integer(idx as i64))
        );
    }

    #[test]
    fn skip_records_fault_and_continues() {
        let mut stream = stream_of(|sink| {
            sink.row(vec![Scalar::from("a")]);
            let err = Error::new(ErrorKind::Parse).with_message("bad bytes");
            if sink.reject(ErrorPolicy::Skip, 2, err) {
                sink.row(vec![Scalar::from("c")]);
            }
        });
        let rows = stream.by_ref().collect::<Result<Vec<_>, _>>().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(stream.faults().len(), 1);
        assert_eq!(stream.faults()[0].record, 2);
        assert_eq!(stream.faults()[0].message, "bad bytes");
    }

    #[test]
    fn skipped_faults_beyond_cap_are_only_counted() {
        let extra = 5;
        let mut stream = stream_of(move |sink| {
            for record in 0..(MAX_RECORDED_FAULTS + extra) as u64 {
                let err = Error::new(ErrorKind::Parse).with_message("bad bytes");
                if !sink.reject(ErrorPolicy::Skip, record + 2, err) {
                    return;
                }
            }
            sink.row(vec![Scalar::from("last")]);
        });
        let rows = stream.by_ref().collect::<Result<Vec<_>, _>>().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(stream.faults().len(), MAX_RECORDED_FAULTS);
        assert_eq!(stream.skipped(), (MAX_RECORDED_FAULTS + extra) as u64);
        assert_eq!(stream.faults()[0].record, 2);
    }

    #[test]
    fn stop_yields_error_last() {
        let mut stream = stream_of(|sink| {
            sink.row(vec![Scalar::from("a")]);
            let err = Error::new(ErrorKind::Parse).with_message("bad bytes");
            if sink.reject(ErrorPolicy::Stop, 2, err) {
                sink.row(vec![Scalar::from("never")]);
            }
        });
        assert!(stream.next().expect("first").is_ok());
        let err = stream.next().expect("second").expect_err("error");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(stream.next().is_none());
    }

    #[test]
    fn dropping_stream_releases_producer() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let mut stream = stream_of(move |sink| {
            for idx in 0..1_000_000 {
                if !sink.row(vec![Scalar::Integer(idx)]) {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(stream.next().is_some());
        drop(stream);
        assert!(produced.load(Ordering::SeqCst) < 1_000_000);
    }

    #[test]
    fn panicking_producer_surfaces_internal_error() {
        let mut stream = stream_of(|_sink| panic!("boom"));
        let err = stream.next().expect("item").expect_err("error");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(stream.next().is_none());
    }
}
