use std::ffi::OsStr;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ro_cli::commands::{self, Context};
use ro_cli::{Cli, Commands, Verbosity};
use ro_core::services::config_loader;
use ro_core::services::http_gateway::EcsHttpGateway;
use ro_core::services::progress::{DebugProgress, DotProgress, NoopProgress, ProgressReporter};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let _guard = setup_logging(&cli);
    if let Err(e) = color_eyre::install() {
        eprintln!("{e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("Error: {report:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> color_eyre::Result<()> {
    let mut stdout = std::io::stdout();
    if !cli.command.needs_cluster() {
        commands::version::execute(&mut stdout)?;
        return Ok(());
    }

    let file_config = config_loader::load_or_default(&std::env::current_dir()?)?;
    let config = cli.config(&file_config);
    tracing::debug!(endpoint = %config.endpoint_url, options = ?config.options, "configuration");

    let gateway = EcsHttpGateway::new(&config.endpoint_url)?.with_desired_count(config.desired_count);
    let progress: Box<dyn ProgressReporter> = match config.verbosity {
        Verbosity::Debug => Box::new(DebugProgress),
        Verbosity::Quiet => Box::new(NoopProgress),
        Verbosity::Normal => Box::new(DotProgress::stderr()),
    };
    let ctx = Context {
        gateway: &gateway,
        progress: progress.as_ref(),
        options: config.options.clone(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match &cli.command {
            Commands::Register(args) => commands::register::execute(args, &ctx, &mut stdout).await,
            Commands::Install(args) => commands::install::execute(args, &ctx, &mut stdout).await,
            Commands::Upgrade(args) => commands::upgrade::execute(args, &ctx, &mut stdout).await,
            Commands::Task(args) => commands::task::execute(args, &ctx, &mut stdout).await,
            Commands::Version => commands::version::execute(&mut stdout),
        }
    })?;
    Ok(())
}

/// Console logging at the chosen verbosity, plus an optional debug log file.
/// The returned guard must live until exit so the file writer flushes.
fn setup_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter = match cli.verbosity() {
        Verbosity::Normal => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Verbosity::Normal.filter_directive())),
        other => EnvFilter::new(other.filter_directive()),
    };
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file, guard) = match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("rollout.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}
