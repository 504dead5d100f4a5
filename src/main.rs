//! Purpose: `runsql` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, writes results to stdout.
//! Invariants: Query results are the only stdout payload; progress, notices, and errors go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Color is resolved once from `--color` and `NO_COLOR`, then passed explicitly.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod color_json;
mod command_dispatch;
mod render;
mod serve;

use color_json::colorize_json;
use runsql::api::{
    DEFAULT_SAMPLE_ROWS, Engine, Error, ErrorKind, ErrorPolicy, LoadOptions, LoadReport, Source,
    SourceOptions, default_query, table_name_from_path, to_exit_code,
};
use runsql::notice::{Notice, notice_json};

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let fallback_color = ColorMode::Auto.resolve(no_color_env());
    let args: Vec<OsString> = std::env::args_os().collect();
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        fallback_color,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err, &args);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    fallback_color,
                ));
            }
        },
    };

    let color_mode = cli.color.resolve(no_color_env());
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_not_found_hint)
        .map_err(|err| (err, color_mode))
}

fn no_color_env() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

#[derive(Parser)]
#[command(
    name = "runsql",
    version,
    about = "Run SQL queries on CSV, JSON, and spreadsheet files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ runsql query -f users.csv -q "SELECT * FROM users LIMIT 5"
  $ runsql query -f users.csv,orders.json -q "SELECT * FROM users JOIN orders ON users.id = orders.user_id"
  $ runsql query -f report.xlsx -o json
  $ runsql serve --bind 127.0.0.1:9090

NOTES
  - Each file becomes a table named after the file (users.csv -> users)
  - Column types are inferred from the first 100 rows (INTEGER, REAL, or TEXT)
  - Tables live in memory for the duration of one command or request"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize tables, JSON, and stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// `NO_COLOR` only overrides the automatic choice, never an explicit flag.
    fn resolve(self, no_color: bool) -> Self {
        match self {
            ColorMode::Auto if no_color => ColorMode::Never,
            other => other,
        }
    }

    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorPolicyCli {
    Stop,
    Skip,
}

impl From<ErrorPolicyCli> for ErrorPolicy {
    fn from(value: ErrorPolicyCli) -> Self {
        match value {
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct LoadArgs {
    #[arg(
        short = 'e',
        long = "errors",
        default_value = "stop",
        value_enum,
        help = "Malformed record policy: stop|skip",
        long_help = r#"Malformed record policy

  stop  Abort the load on the first malformed record; nothing is loaded
  skip  Drop malformed records, report each one, and keep loading

JSON syntax errors always stop, because the parser cannot resynchronize."#
    )]
    errors: ErrorPolicyCli,
    #[arg(
        long = "sample-rows",
        default_value_t = DEFAULT_SAMPLE_ROWS,
        value_name = "N",
        help = "Rows sampled per file to infer column types"
    )]
    sample_rows: usize,
}

impl LoadArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions::default().with_sample_rows(self.sample_rows)
    }

    fn source_options(&self) -> SourceOptions {
        SourceOptions::default().with_errors(self.errors.into())
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Load files into tables and run one SQL query",
        after_help = r#"EXAMPLES
  $ runsql query -f users.csv                                   # SELECT * FROM users
  $ runsql query -f users.csv -f orders.json -q "SELECT count(*) FROM orders"
  $ runsql query -f data.csv -o csv > out.csv
  $ runsql query -f messy.csv --errors skip

NOTES
  - -f accepts repeated flags or a comma-separated list
  - Without -q the first file's table is selected in full"#
    )]
    Query {
        #[arg(
            short = 'f',
            long = "file",
            required = true,
            value_delimiter = ',',
            value_name = "PATH",
            help = "Input file (.csv, .json, .xlsx); repeatable or comma-separated",
            value_hint = ValueHint::FilePath
        )]
        files: Vec<PathBuf>,
        #[arg(short = 'q', long = "query", help = "SQL statement to run")]
        query: Option<String>,
        #[arg(
            short = 'o',
            long = "output",
            default_value = "table",
            value_enum,
            help = "Output format: table|json|csv"
        )]
        output: OutputFormat,
        #[command(flatten)]
        load: LoadArgs,
    },
    #[command(
        about = "Serve the upload-and-query HTTP API",
        after_help = r#"EXAMPLES
  $ runsql serve
  $ runsql serve --bind 127.0.0.1:9090 --max-body-bytes 52428800
  $ curl -F file=@users.csv -F 'query=SELECT * FROM users' http://127.0.0.1:8080/query

NOTES
  - GET /health, POST /schema, POST /query (multipart: file..., query, format)
  - Loopback is the default; non-loopback binds require --allow-non-loopback"#
    )]
    Serve(ServeArgs),
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ runsql completion bash > ~/.local/share/bash-completion/completions/runsql
  $ runsql completion zsh > ~/.zfunc/_runsql"#
    )]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Show version information")]
    Version,
}

#[derive(Args, Clone, Debug)]
struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Listen address (host:port)")]
    bind: String,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Maximum request body size in bytes"
    )]
    max_body_bytes: u64,
    #[command(flatten)]
    load: LoadArgs,
}

fn serve_config_from_args(args: ServeArgs) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid bind address: {}", args.bind))
            .with_hint("Use a host:port value like 127.0.0.1:8080.")
    })?;
    Ok(serve::ServeConfig {
        bind,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
        load: args.load.load_options(),
        source: args.load.source_options(),
    })
}

/// Trim each `-f` value and drop empties, so `-f "a.csv, b.json,"` works.
fn normalize_file_args(files: Vec<PathBuf>) -> Result<Vec<PathBuf>, Error> {
    let files: Vec<PathBuf> = files
        .into_iter()
        .filter_map(|path| {
            let text = path.to_string_lossy();
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        })
        .collect();
    if files.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("at least one input file is required")
            .with_hint("Pass -f <path>, for example `runsql query -f users.csv`."));
    }
    Ok(files)
}

fn run_query(
    files: &[PathBuf],
    query: Option<&str>,
    load: &LoadArgs,
    color_mode: ColorMode,
) -> Result<runsql::api::QueryResult, Error> {
    let mut engine = Engine::with_options(load.load_options())?;
    let mut first_table: Option<String> = None;
    for path in files {
        let table = table_name_from_path(path);
        let source = Source::open_path(path, load.source_options())?;
        let report = engine.load(&table, source)?;
        emit_load_report(path, &report, color_mode);
        first_table.get_or_insert(table);
    }

    let sql = match query.map(str::trim).filter(|sql| !sql.is_empty()) {
        Some(sql) => sql.to_string(),
        None => default_query(first_table.as_deref().unwrap_or_default()),
    };
    tracing::debug!(sql = %sql, "running query");
    engine.query(&sql)
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn add_not_found_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::NotFound || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check the path; relative paths resolve from the current directory.")
}

fn emit_load_report(path: &Path, report: &LoadReport, color_mode: ColorMode) {
    let use_color = color_mode.use_color(io::stderr().is_terminal());
    eprintln!(
        "{} '{}' as table '{}' ({} rows)",
        colorize_label("loaded", use_color, AnsiColor::Green),
        path.display(),
        report.table,
        report.rows_loaded
    );
    for fault in &report.faults {
        let mut details = Map::new();
        details.insert("table".to_string(), json!(report.table));
        details.insert("record".to_string(), json!(fault.record));
        let notice = Notice {
            kind: "skip".to_string(),
            time: notice_time_now().unwrap_or_default(),
            cmd: "query".to_string(),
            source: fault.source.clone(),
            message: format!("skipped record {}: {}", fault.record, fault.message),
            details,
        };
        emit_notice(&notice, color_mode);
    }
    let unlisted = report.rows_skipped.saturating_sub(report.faults.len() as u64);
    if unlisted > 0 {
        let mut details = Map::new();
        details.insert("table".to_string(), json!(report.table));
        details.insert("unlisted".to_string(), json!(unlisted));
        let notice = Notice {
            kind: "skip".to_string(),
            time: notice_time_now().unwrap_or_default(),
            cmd: "query".to_string(),
            source: path.display().to_string(),
            message: format!(
                "skipped {} records in total; {unlisted} not listed",
                report.rows_skipped
            ),
            details,
        };
        emit_notice(&notice, color_mode);
    }
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("runsql {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "runsql",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let use_color = color_mode.use_color(is_tty);
    let json = if is_tty || use_color {
        colorize_json(&value, use_color)
    } else {
        serde_json::to_string(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    };
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
    Green,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
        AnsiColor::Green => "32",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (source: {})", notice.message, notice.source);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Parse => "malformed input".to_string(),
        ErrorKind::Schema => "schema error".to_string(),
        ErrorKind::Load => "load failed".to_string(),
        ErrorKind::Query => "query failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(record) = err.record() {
        inner.insert("record".to_string(), json!(record));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(table) = err.table() {
        lines.push(format!(
            "{} {table}",
            colorize_label("table:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(record) = err.record() {
        lines.push(format!(
            "{} {record}",
            colorize_label("record:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error, args: &[OsString]) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let parts: Vec<String> = match usage {
        Some(usage) => {
            let tokens: Vec<&str> = usage.split_whitespace().collect();
            match tokens.iter().position(|t| *t == "runsql") {
                Some(pos) => tokens
                    .iter()
                    .skip(pos + 1)
                    .take_while(|token| {
                        !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
                    })
                    .map(|token| token.to_string())
                    .collect(),
                None => Vec::new(),
            }
        }
        None => Vec::new(),
    };

    // Value errors carry no usage line; fall back to the subcommand on the command line.
    let parts = if parts.is_empty() {
        requested_subcommand(args).into_iter().collect()
    } else {
        parts
    };

    if parts.is_empty() {
        return "Try `runsql --help`.".to_string();
    }
    format!("Try `runsql {} --help`.", parts.join(" "))
}

fn requested_subcommand(args: &[OsString]) -> Option<String> {
    let cli = Cli::command();
    args.iter()
        .skip(1)
        .map(|arg| arg.to_string_lossy())
        .find(|arg| cli.get_subcommands().any(|sub| sub.get_name() == &**arg))
        .map(|arg| arg.into_owned())
}
