use clap::Parser;
use tracing::error;

use vpndesk::cli::{Cli, TopCommand};
use vpndesk::{backend, config, handlers, logging};

fn main() {
    let cli = Cli::parse();

    match cli.command {
        // Backend daemon: multi-threaded runtime, one task per client.
        TopCommand::Backend {
            serve,
            authorized_group,
        } => {
            if !serve {
                eprintln!("backend mode requires --serve");
                std::process::exit(1);
            }
            if let Err(e) = run_backend(authorized_group, cli.verbose) {
                eprintln!("backend service error: {}", e);
                std::process::exit(1);
            }
        }

        // Client commands share one cooperative event loop.
        other => {
            logging::init_terminal(cli.verbose);
            if let Err(e) = run_client(other) {
                error!( error = ?e.to_string(), "command_failed");
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_client(command: TopCommand) -> anyhow::Result<()> {
    let config = config::load_config()?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(handlers::dispatch(command, &config))
}

fn run_backend(authorized_group: Option<String>, verbose: bool) -> anyhow::Result<()> {
    let mut config = config::load_config()?;
    if authorized_group.is_some() {
        config.backend.authorized_group = authorized_group;
    }
    match &config.backend.log_file {
        Some(path) => logging::init_file(path, verbose)?,
        None => logging::init_terminal(verbose),
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(backend::serve(config.backend))
}
