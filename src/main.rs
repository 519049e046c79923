use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use presence_ipc::cli::{self, Cli, Commands};

/// Logs go to stderr so `set` output stays pipeable.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.init {
        return cli::init_config(&cli.config);
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Filetypes { pattern } = &command {
        return cli::run_filetypes(pattern.as_deref());
    }

    let config = cli::load_config(&cli.config)?;
    match command {
        Commands::Set {
            file,
            filetype,
            workspace,
            force,
        } => tokio::task::block_in_place(|| cli::run_set(config, &file, filetype, workspace, force)),
        Commands::Watch { dir } => cli::run_watch(config, &dir).await,
        Commands::Host { socket } => cli::run_host(&config, socket).await,
        Commands::Filetypes { .. } => Ok(()),
    }
}
