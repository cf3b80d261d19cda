mod app;
mod cli;
mod persistence;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use billing_engine::{ApiGateway, GatewaySettings};
use billing_logging::{billing_error, billing_info};
use clap::Parser;
use log::LevelFilter;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::persistence::{FileCredentialStore, TerminalLogoutHook};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Some(destination) = cli.log_destination() {
        billing_logging::initialize(&destination, level);
    }

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            billing_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut settings = GatewaySettings::with_base_url(&cli.base_url)?;
    settings.request_timeout = Duration::from_secs(cli.timeout_secs.max(1));
    billing_info!("Using API at {}", settings.base_url);

    let store = Arc::new(FileCredentialStore::open(
        cli.session_file.clone(),
        settings.base_url.as_str(),
    ));
    let hook = Arc::new(TerminalLogoutHook::new());
    let session_ended = hook.subscribe();
    let gateway = Arc::new(ApiGateway::new(settings, store.clone(), hook)?);
    let app = App {
        gateway,
        store,
        session_ended,
    };

    match cli.command {
        Command::Login(args) => app.login(args).await,
        Command::Logout => {
            app.logout();
            Ok(())
        }
        Command::Status => {
            app.status();
            Ok(())
        }
        Command::Browse(args) => app.browse(args).await,
        Command::Task(args) => app.task(args).await,
        Command::Run(args) => app.run(args).await,
    }
}
