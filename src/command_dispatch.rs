//! Purpose: Route parsed CLI subcommands to their handlers.
//! Role: Keeps `main.rs` focused on argument shapes and output conventions.
//! Invariants: Every handler reports failures as `Error` so exit codes stay uniform.
use super::*;

pub(super) fn dispatch_command(
    command: Command,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Query {
            files,
            query,
            output,
            load,
        } => {
            init_tracing();
            let files = normalize_file_args(files)?;
            let result = run_query(&files, query.as_deref(), &load, color_mode)?;
            render::emit_result(&result, output, color_mode)?;
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "runsql", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
    }
}
