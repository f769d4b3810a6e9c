//! iDRAC controller entry point: CLI dispatch, signal handling, worker spawn.

mod app;
mod config;
mod control;
mod ipmi;
mod mqtt;
mod status;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use app::cli::Args;
use app::logging::{filter_for_level, init_tracing};
use config::persistence::load_config;
use config::types::ControllerConfig;
use ipmi::gateway::{BmcGateway, IpmitoolGateway};
use ipmi::parser::{
    parse_fan_rpms, parse_model_info, parse_power_consumption, parse_temperatures, TempPatterns,
};
use ipmi::types::{SdrType, TemperatureSet};
use mqtt::MqttPublisher;
use status::{new_shared_status, run_snapshot_writer};
use worker::ServerWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Level resolution: --log-level flag, then LOG_LEVEL env, then the
    // config file, then info.
    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .or_else(|| peek_config_log_level(args.config.as_deref()))
        .unwrap_or_else(|| "info".to_string());
    init_tracing(filter_for_level(&level));

    info!("===== iDRAC Controller v{} starting =====", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_deref()).await?;

    if args.test {
        return run_test_mode(&config).await;
    }

    let running = Arc::new(AtomicBool::new(true));
    let status = new_shared_status();

    let mut handles = Vec::new();
    for server in config.servers.iter().filter(|s| s.enabled) {
        let gateway: Arc<dyn BmcGateway> = Arc::new(IpmitoolGateway::new(server, args.dry_run));
        let publisher = Box::new(MqttPublisher::connect(&config.global.mqtt, &server.alias));
        match ServerWorker::new(
            server,
            &config.global,
            gateway,
            publisher,
            status.clone(),
            running.clone(),
        ) {
            Ok(worker) => {
                info!("Starting worker for '{}'", server.alias);
                handles.push(tokio::spawn(worker.run()));
            }
            // Fatal to this server only; its peers keep running.
            Err(e) => error!("Worker for '{}' will not start: {:#}", server.alias, e),
        }
    }
    if handles.is_empty() {
        warn!("No runnable servers configured; only the status file will be maintained");
    }

    let snapshot_handle = {
        let status = status.clone();
        let running = running.clone();
        let path = PathBuf::from(&config.global.status_file);
        tokio::spawn(async move { run_snapshot_writer(status, &path, running).await })
    };

    let running_for_signal = running.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received. Cleaning up...");
        running_for_signal.store(false, Ordering::SeqCst);
    });

    for handle in handles {
        let _ = handle.await;
    }
    let _ = snapshot_handle.await;

    info!("===== iDRAC Controller stopped =====");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Best-effort read of the config file's log level before tracing exists.
fn peek_config_log_level(path: Option<&Path>) -> Option<String> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_exe().ok()?.parent()?.join("config.json"),
    };
    let content = std::fs::read_to_string(path).ok()?;
    let config: ControllerConfig = serde_json::from_str(&content).ok()?;
    Some(config.global.log_level)
}

/// One-shot discovery: poll each enabled server once and print the parsed
/// readings as JSON. Fan control is never touched (the gateway runs in
/// dry-run mode).
async fn run_test_mode(config: &ControllerConfig) -> Result<()> {
    for server in config.servers.iter().filter(|s| s.enabled) {
        let gateway = IpmitoolGateway::new(server, true);
        let patterns = match TempPatterns::new(
            &server.cpu_pattern,
            &server.inlet_pattern,
            &server.exhaust_pattern,
        ) {
            Ok(p) => p,
            Err(e) => {
                error!("Invalid sensor pattern for '{}': {}", server.alias, e);
                continue;
            }
        };

        let identity = match gateway.fetch_fru().await {
            Ok(fru) => parse_model_info(&fru),
            Err(e) => {
                warn!("[{}] Could not retrieve FRU data: {}", server.alias, e);
                Default::default()
            }
        };
        let temps = match gateway.fetch_sdr(SdrType::Temperature).await {
            Ok(text) => parse_temperatures(&text, &patterns),
            Err(e) => {
                warn!("[{}] Could not retrieve temperature data: {}", server.alias, e);
                TemperatureSet::default()
            }
        };
        let fans = match gateway.fetch_sdr(SdrType::Fan).await {
            Ok(text) => parse_fan_rpms(&text),
            Err(_) => Vec::new(),
        };
        let power = match gateway.fetch_sdr(SdrType::Current).await {
            Ok(text) => parse_power_consumption(&text),
            Err(_) => None,
        };

        let report = json!({
            "alias": server.alias,
            "manufacturer": identity.manufacturer,
            "model": identity.model,
            "cpu_temps_c": temps.cpu_temps,
            "hottest_cpu_temp_c": temps.hottest_cpu(),
            "inlet_temp_c": temps.inlet_temp,
            "exhaust_temp_c": temps.exhaust_temp,
            "power_consumption_watts": power,
            "fans": fans,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
