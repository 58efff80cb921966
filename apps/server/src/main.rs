#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use deadman::config::Config;
use deadman::{Monitor, Orchestrator, SweepOutcome};
use tracing::{info, warn};

mod cli;
mod error;
mod routes;

use cli::{AddMonitorArgs, Cli, Commands};
use error::AppError;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logger::init_with_level(cli.log_level);

    let config = Config::from_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Commands::Serve { memory: false }) {
        Commands::Serve { memory } => serve(config, memory).await,
        Commands::ScanOnce => scan_once(config).await,
        Commands::AddMonitor(args) => add_monitor(config, args).await,
        Commands::Status { id } => {
            let engine = Orchestrator::from_config(config).await?;
            let status = engine.get_status(id).await;
            engine.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&status?)?);
            Ok(())
        }
        Commands::ShowConfig => {
            print!("{config}");
            Ok(())
        }
    }
}

async fn serve(config: Config, memory: bool) -> Result<(), AppError> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let mut engine = if memory {
        warn!("Running with an in-memory store, monitors are lost on exit");
        Orchestrator::in_memory(config)?
    } else {
        Orchestrator::from_config(config).await?
    };
    engine.start();

    let engine = web::Data::new(engine);
    run_server(addr, engine.clone()).await?;

    match Arc::try_unwrap(engine.into_inner()) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => warn!("Engine still referenced at exit, skipping notification drain"),
    }
    Ok(())
}

async fn run_server(addr: SocketAddr, engine: web::Data<Orchestrator>) -> Result<(), AppError> {
    info!("Listening on {}", addr);
    HttpServer::new(move || App::new().app_data(engine.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}

async fn scan_once(config: Config) -> Result<(), AppError> {
    let engine = Orchestrator::from_config(config).await?;
    let outcome = engine.run_scan_tick(None).await;
    engine.wait_idle().await;
    engine.shutdown().await;

    match outcome {
        SweepOutcome::Completed(report) => println!(
            "evaluated {}, transitioned {}, alerts {}, conflicts {}, failures {}",
            report.evaluated, report.transitioned, report.alerts_enqueued, report.conflicts, report.failures
        ),
        SweepOutcome::Skipped => println!("sweep skipped, another one is running"),
    }
    Ok(())
}

async fn add_monitor(config: Config, args: AddMonitorArgs) -> Result<(), AppError> {
    let grace = args.grace.unwrap_or(config.monitors.grace_period_seconds);
    let engine = Orchestrator::from_config(config).await?;

    let mut monitor = Monitor::new(args.owner, args.name, args.interval, engine.now()).with_grace_period(grace);
    if let Some(email) = args.email {
        monitor = monitor.with_email(email);
    }
    if let Some(webhook) = args.webhook {
        monitor = monitor.with_webhook(webhook);
    }
    if let Some(expires_at) = args.expires_at {
        monitor = monitor.expiring_at(expires_at);
    }

    let created = engine.register_monitor(monitor).await;
    engine.shutdown().await;
    let created = created?;

    println!("{}", created.id);
    println!("ping with: curl -fsS -X POST http://<host>/ping/{}", created.id);
    Ok(())
}
