use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use p2pvps_core::agent::initialize_agent;
use p2pvps_core::config::{AgentSettings, DeviceIdentity};
use p2pvps_core::server::RegistrationClient;
use p2pvps_core::status;

mod args;
mod logfile;

use args::{Args, Command};
use logfile::CappedLogFile;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_file.as_deref(), args.log_max_bytes) {
        eprintln!("could not open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let settings = args.settings();
    let identity = match DeviceIdentity::load(&settings.config_path) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "could not load device config");
            return ExitCode::FAILURE;
        }
    };

    let client = Client::new();
    match args.command() {
        Command::Run => run(identity, client, &settings).await,
        Command::ShowDevice => show_device(&identity, client, &settings).await,
    }
}

async fn run(identity: DeviceIdentity, client: Client, settings: &AgentSettings) -> ExitCode {
    let device_id = identity.device_id.clone();
    let orchestrator = match initialize_agent(identity, client, settings).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "could not initialize the device client");
            return ExitCode::FAILURE;
        }
    };

    if let Some(addr) = settings.status_addr {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let router = status::router(device_id, orchestrator.subscribe());
                tokio::spawn(async move {
                    if let Err(e) = status::serve(listener, router).await {
                        warn!(error = %e, "status listener stopped");
                    }
                });
            }
            Err(e) => warn!(%addr, error = %e, "could not bind status listener, continuing without it"),
        }
    }

    tokio::select! {
        fatal = orchestrator.run() => {
            error!(phase = fatal.phase(), error = %fatal, "p2pvps-client stopped");
            ExitCode::FAILURE
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            ExitCode::SUCCESS
        }
    }
}

async fn show_device(identity: &DeviceIdentity, client: Client, settings: &AgentSettings) -> ExitCode {
    let server = RegistrationClient::for_device(client, identity, settings.request_timeout);
    match server.get_device_public_model(&identity.device_id).await {
        Ok(model) => match serde_json::to_string_pretty(&model) {
            Ok(pretty) => {
                println!("{}", pretty);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "could not format device record");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(kind = e.kind(), error = %e, "could not fetch device record");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_file: Option<&Path>, max_bytes: u64) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let sink = CappedLogFile::open(path, max_bytes)?;
            builder.with_ansi(false).with_writer(Arc::new(sink)).init();
        }
        None => builder.init(),
    }
    Ok(())
}
