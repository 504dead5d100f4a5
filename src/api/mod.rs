//! Purpose: Define the public Rust API boundary for runsql.
//! Exports: Sources, the load/query engine, result types, naming helpers, and errors.
//! Role: Additive-only surface used by the CLI, the HTTP service, and tests.
//! Invariants: Internal modules remain private and are not directly exposed.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::infer::{
    ColumnType, DEFAULT_SAMPLE_ROWS, classify_literal, infer_column_types,
};
pub use crate::core::naming::{
    column_names, quote_ident, sanitize_header, sanitize_table_name, table_name_from_path,
};
pub use crate::core::store::{
    ColumnDef, Engine, LoadOptions, LoadReport, QueryResult, default_query,
};
pub use crate::core::value::{Row, Scalar};
pub use crate::source::{
    DelimitedSource, ErrorPolicy, RecordSource, RowFault, RowStream, SheetSource, Source,
    SourceFormat, SourceOptions,
};
