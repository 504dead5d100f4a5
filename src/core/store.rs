//! Purpose: Transient relational store plus the transactional bulk loader.
//! Exports: `Engine`, `LoadOptions`, `LoadReport`, `ColumnDef`, `QueryResult`, `default_query`.
//! Role: The only component that talks to SQLite; owns schema creation, inserts, and queries.
//! Invariants: One load = one transaction covering CREATE TABLE and every row.
//! Invariants: A failed load leaves no table and no rows behind.
//! Invariants: Sampled rows are inserted first, in source order, then the rest of the stream.
use rusqlite::{Connection, Statement, params_from_iter};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind};
use crate::core::infer::{ColumnType, DEFAULT_SAMPLE_ROWS, infer_column_types};
use crate::core::naming::{column_names, quote_ident};
use crate::core::value::{Row, Scalar, fit_row};
use crate::source::{RowFault, Source};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoadOptions {
    /// Rows buffered for type inference before the table is created.
    pub sample_rows: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

impl LoadOptions {
    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rows == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("sample size must be at least 1 row")
                .with_hint("Pass --sample-rows with a positive value."));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

#[derive(Clone, Debug)]
pub struct LoadReport {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub faults: Vec<RowFault>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

pub struct Engine {
    conn: Connection,
    options: LoadOptions,
}

impl Engine {
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::with_options(LoadOptions::default())
    }

    pub fn with_options(options: LoadOptions) -> Result<Self, Error> {
        options.validate()?;
        let conn = Connection::open_in_memory().map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to open in-memory database")
                .with_source(err)
        })?;
        Ok(Self { conn, options })
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// Create `table` from the source's inferred schema and insert every row.
    /// All-or-nothing: on error the table does not exist afterwards.
    pub fn load(&mut self, table: &str, source: Source) -> Result<LoadReport, Error> {
        self.load_inner(table, source)
            .map_err(|err| err.or_table(table))
    }

    fn load_inner(&mut self, table: &str, source: Source) -> Result<LoadReport, Error> {
        let names = column_names(source.headers());
        if names.is_empty() {
            return Err(Error::new(ErrorKind::Schema)
                .with_message("source has no columns")
                .with_path(source.label()));
        }
        let width = names.len();
        let mut stream = source.read()?;

        let limit = self.options.sample_rows;
        let mut sample: Vec<Row> = Vec::with_capacity(limit.min(DEFAULT_SAMPLE_ROWS));
        while sample.len() < limit {
            match stream.next() {
                Some(row) => sample.push(fit_row(row?, width)),
                None => break,
            }
        }

        let types = infer_column_types(width, &sample);
        let columns: Vec<ColumnDef> = names
            .into_iter()
            .zip(types)
            .map(|(name, kind)| ColumnDef { name, kind })
            .collect();
        debug!(
            table,
            source = stream.source(),
            sampled = sample.len(),
            "inferred column types"
        );

        let tx = self.conn.transaction().map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message("failed to begin load transaction")
                .with_source(err)
        })?;
        tx.execute_batch(&create_table_sql(table, &columns))
            .map_err(|err| {
                Error::new(ErrorKind::Schema)
                    .with_message(format!("failed to create table: {err}"))
                    .with_source(err)
            })?;

        let mut rows_loaded = 0u64;
        {
            let mut insert = tx.prepare(&insert_sql(table, &columns)).map_err(|err| {
                Error::new(ErrorKind::Schema)
                    .with_message(format!("failed to prepare insert: {err}"))
                    .with_source(err)
            })?;
            for row in sample {
                rows_loaded += 1;
                insert_row(&mut insert, &row, rows_loaded)?;
            }
            for row in stream.by_ref() {
                let row = fit_row(row?, width);
                rows_loaded += 1;
                insert_row(&mut insert, &row, rows_loaded)?;
            }
        }

        tx.commit().map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message("failed to commit load transaction")
                .with_source(err)
        })?;

        let rows_skipped = stream.skipped();
        info!(
            table,
            source = stream.source(),
            rows = rows_loaded,
            skipped = rows_skipped,
            "loaded table"
        );
        Ok(LoadReport {
            table: table.to_string(),
            columns,
            rows_loaded,
            rows_skipped,
            faults: stream.take_faults(),
        })
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult, Error> {
        if sql.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("query is empty"));
        }
        let mut stmt = self.conn.prepare(sql).map_err(query_error)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).map_err(query_error)?;
        while let Some(row) = cursor.next().map_err(query_error)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(Scalar::from_sql(row.get_ref(idx).map_err(query_error)?));
            }
            rows.push(values);
        }
        debug!(columns = width, rows = rows.len(), "query finished");
        Ok(QueryResult { columns, rows })
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let sql = format!("SELECT * FROM {} LIMIT 0", quote_ident(table));
        let stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| query_error(err).with_table(table))?;
        Ok(stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}

/// `SELECT * FROM "<table>"`, used when the caller gives no statement.
pub fn default_query(table: &str) -> String {
    format!("SELECT * FROM {}", quote_ident(table))
}

pub(crate) fn create_table_sql(table: &str, columns: &[ColumnDef]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), column.kind.as_sql()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

pub(crate) fn insert_sql(table: &str, columns: &[ColumnDef]) -> String {
    let names: Vec<String> = columns.iter().map(|column| quote_ident(&column.name)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(table),
        names.join(", ")
    )
}

fn insert_row(insert: &mut Statement<'_>, row: &[Scalar], position: u64) -> Result<(), Error> {
    insert.execute(params_from_iter(row.iter())).map_err(|err| {
        Error::new(ErrorKind::Load)
            .with_message(format!("failed to insert row {position}: {err}"))
            .with_source(err)
    })?;
    Ok(())
}

fn query_error(err: rusqlite::Error) -> Error {
    Error::new(ErrorKind::Query)
        .with_message(format!("query failed: {err}"))
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, Engine, LoadOptions, create_table_sql, default_query, insert_sql};
    use crate::core::error::ErrorKind;
    use crate::core::infer::ColumnType;
    use crate::core::value::Scalar;
    use crate::source::{ErrorPolicy, MAX_RECORDED_FAULTS, Source, SourceFormat, SourceOptions};

    fn csv(input: &str) -> Source {
        csv_with(input, ErrorPolicy::Stop)
    }

    fn csv_with(input: &str, errors: ErrorPolicy) -> Source {
        Source::open_bytes(
            SourceFormat::Delimited,
            "test.csv",
            input.as_bytes().to_vec(),
            SourceOptions::default().with_errors(errors),
        )
        .expect("source")
    }

    fn table_exists(engine: &Engine, table: &str) -> bool {
        let result = engine
            .query(&format!(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'"
            ))
            .expect("sqlite_master");
        result.rows[0][0] == Scalar::Integer(1)
    }

    #[test]
    fn ddl_and_dml_quote_identifiers() {
        let columns = vec![
            ColumnDef {
                name: "id".to_string(),
                kind: ColumnType::Integer,
            },
            ColumnDef {
                name: "odd\"name".to_string(),
                kind: ColumnType::Text,
            },
        ];
        assert_eq!(
            create_table_sql("t", &columns),
            r#"CREATE TABLE "t" ("id" INTEGER, "odd""name" TEXT)"#
        );
        assert_eq!(
            insert_sql("t", &columns),
            r#"INSERT INTO "t" ("id", "odd""name") VALUES (?, ?)"#
        );
        assert_eq!(default_query("my table"), r#"SELECT * FROM "my table""#);
    }

    #[test]
    fn csv_round_trip_with_inferred_types() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let report = engine
            .load("t", csv("id,name\n1,Apple\n2,Banana\n"))
            .expect("load");
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.columns[0].kind, ColumnType::Integer);
        assert_eq!(report.columns[1].kind, ColumnType::Text);

        let result = engine.query("SELECT * FROM t ORDER BY id").expect("query");
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Scalar::Integer(1), Scalar::from("Apple")],
                vec![Scalar::Integer(2), Scalar::from("Banana")],
            ]
        );
        assert_eq!(engine.table_columns("t").expect("columns"), vec!["id", "name"]);
    }

    #[test]
    fn real_column_stores_numbers() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let report = engine
            .load("prices", csv("price,note\n123,a\n,b\n45.6,c\n"))
            .expect("load");
        assert_eq!(report.columns[0].kind, ColumnType::Real);
        let result = engine
            .query("SELECT typeof(price) FROM prices ORDER BY rowid")
            .expect("query");
        assert_eq!(result.rows[0][0], Scalar::from("real"));
        assert_eq!(result.rows[1][0], Scalar::from("text"));
        assert_eq!(result.rows[2][0], Scalar::from("real"));
    }

    #[test]
    fn sample_bound_only_limits_inference() {
        let mut input = String::from("value\n");
        for idx in 0..5 {
            input.push_str(&format!("{idx}\n"));
        }
        input.push_str("not-a-number\n");
        let mut engine =
            Engine::with_options(LoadOptions::default().with_sample_rows(5)).expect("engine");
        let report = engine.load("bounded", csv(&input)).expect("load");
        assert_eq!(report.columns[0].kind, ColumnType::Integer);
        assert_eq!(report.rows_loaded, 6);
        let result = engine
            .query("SELECT value FROM bounded ORDER BY rowid")
            .expect("query");
        assert_eq!(result.rows.len(), 6);
        assert_eq!(result.rows[5][0], Scalar::from("not-a-number"));
    }

    #[test]
    fn stream_fault_rolls_back_table() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let mut input = b"id,name\n".to_vec();
        for idx in 0..150 {
            input.extend_from_slice(format!("{idx},row\n").as_bytes());
        }
        input.extend_from_slice(b"999,\xff\n");
        let source = Source::open_bytes(
            SourceFormat::Delimited,
            "bad.csv",
            input,
            SourceOptions::default(),
        )
        .expect("source");
        let err = engine.load("bad", source).expect_err("fault");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.table(), Some("bad"));
        assert_eq!(err.record(), Some(151));
        assert!(!table_exists(&engine, "bad"));
    }

    #[test]
    fn skipped_records_are_reported() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let mut input = b"id\n1\n".to_vec();
        input.extend_from_slice(b"\xff\n3\n");
        let source = Source::open_bytes(
            SourceFormat::Delimited,
            "skip.csv",
            input,
            SourceOptions::default().with_errors(ErrorPolicy::Skip),
        )
        .expect("source");
        let report = engine.load("skip", source).expect("load");
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.faults[0].record, 2);
    }

    #[test]
    fn skip_count_is_exact_past_the_fault_cap() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let bad = MAX_RECORDED_FAULTS + 3;
        let mut input = b"id\n1\n".to_vec();
        for _ in 0..bad {
            input.extend_from_slice(b"\xff\n");
        }
        let source = Source::open_bytes(
            SourceFormat::Delimited,
            "noisy.csv",
            input,
            SourceOptions::default().with_errors(ErrorPolicy::Skip),
        )
        .expect("source");
        let report = engine.load("noisy", source).expect("load");
        assert_eq!(report.rows_loaded, 1);
        assert_eq!(report.rows_skipped, bad as u64);
        assert_eq!(report.faults.len(), MAX_RECORDED_FAULTS);
    }

    #[test]
    fn duplicate_table_is_schema_error_and_keeps_original() {
        let mut engine = Engine::open_in_memory().expect("engine");
        engine.load("t", csv("a\n1\n")).expect("first load");
        let err = engine.load("t", csv("a\n2\n")).expect_err("second load");
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(err.table(), Some("t"));
        let result = engine.query("SELECT a FROM t").expect("query");
        assert_eq!(result.rows, vec![vec![Scalar::Integer(1)]]);
    }

    #[test]
    fn colliding_headers_get_distinct_columns() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let report = engine
            .load("dupes", csv("A B,A_B,,x\n1,2,3,4\n"))
            .expect("load");
        let names: Vec<&str> = report.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A_B", "A_B_2", "column_3", "x"]);
    }

    #[test]
    fn empty_record_array_has_no_columns() {
        let mut engine = Engine::open_in_memory().expect("engine");
        let source = Source::open_bytes(
            SourceFormat::Records,
            "empty.json",
            b"[]".to_vec(),
            SourceOptions::default(),
        )
        .expect("source");
        let err = engine.load("empty", source).expect_err("no columns");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn query_errors_are_query_kind() {
        let engine = Engine::open_in_memory().expect("engine");
        let err = engine.query("SELECT * FROM missing").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(err.message().unwrap().contains("missing"));

        let err = engine.query("   ").expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn zero_sample_rows_rejected() {
        let err = Engine::with_options(LoadOptions::default().with_sample_rows(0))
            .err()
            .expect("invalid");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
