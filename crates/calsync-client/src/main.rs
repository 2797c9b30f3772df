//! calsync CLI entry point.

use std::process::ExitCode;

use calsync_core::{TracingConfig, init_tracing};
use clap::Parser;

use calsync_client::cli::{Cli, Command, ConfigAction, DEFAULT_REDIRECT_URI};
use calsync_client::commands::{self, accounts, open_service, sync::SyncArgs};
use calsync_client::config::ClientConfig;
use calsync_client::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = match cli.command {
        Command::Daemon if cli.verbose == 0 => TracingConfig::daemon(),
        _ => TracingConfig::from_verbosity(cli.verbose),
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let (config, path) = match &cli.config {
        Some(path) => (ClientConfig::load_from(path)?, path.clone()),
        None => (ClientConfig::load()?, ClientConfig::default_path()),
    };

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, &path),
        },
        Command::Sync {
            provider,
            calendar,
            from,
            to,
            json,
        } => {
            let service = open_service(&config)?;
            let args = SyncArgs {
                provider,
                calendar,
                from,
                to,
                json,
            };
            commands::sync::run(&service, args).await
        }
        Command::Connect {
            provider,
            code,
            redirect_uri,
        } => {
            let service = open_service(&config)?;
            let redirect_uri = redirect_uri
                .or_else(|| config.section(provider).and_then(|s| s.redirect_uri.clone()))
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
            accounts::connect(&service, provider, code, &redirect_uri).await
        }
        Command::Disconnect { provider } => {
            accounts::disconnect(&open_service(&config)?, provider)
        }
        Command::Status { json } => accounts::status(&open_service(&config)?, json),
        Command::Calendars { provider } => {
            accounts::calendars(&open_service(&config)?, provider).await
        }
        Command::Daemon => {
            let service = open_service(&config)?;
            commands::daemon::run(service, config.scheduler_config()).await
        }
    }
}
