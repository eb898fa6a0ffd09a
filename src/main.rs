use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use wsfs::cli::{Cli, Commands};
use wsfs::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `cat` and `ls` output stays clean on stdout.
    // Only use colors when stderr is a TTY (not when piped to file).
    let use_color = atty::is(atty::Stream::Stderr);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.cmd {
        Commands::Serve(args) => commands::cmd_serve(args).await,
        Commands::Ls(args) => commands::cmd_ls(args).await,
        Commands::Cat(args) => commands::cmd_cat(args).await,
        Commands::Stat(args) => commands::cmd_stat(args).await,
        Commands::Put(args) => commands::cmd_put(args).await,
    };

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
