//! Per-server poll cycle: fetch, parse, decide, act, publish, sleep.
//!
//! One worker per enabled server, each an independent tokio task. Workers
//! share nothing but the status map and the shutdown flag; a server that
//! stops responding is retried forever on the offline backoff cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::config::types::{GlobalSettings, ServerConfig, ThresholdConfig};
use crate::control::{decide, FanCommand};
use crate::ipmi::gateway::BmcGateway;
use crate::ipmi::parser::{
    parse_fan_rpms, parse_model_info, parse_power_consumption, parse_temperatures, TempPatterns,
};
use crate::ipmi::types::{SdrType, ServerIdentity};
use crate::mqtt::StatusPublisher;
use crate::status::{ServerStatus, SharedStatus, TargetFanSpeed};

/// Backoff between fetch attempts while the server is unreachable,
/// deliberately longer than the normal poll interval.
const OFFLINE_BACKOFF: Duration = Duration::from_secs(60);
/// Floor for the end-of-cycle sleep so a slow cycle never spins.
const MIN_SLEEP: Duration = Duration::from_millis(100);
/// Shutdown-latency bound: sleeps are taken in slices this long.
const SLEEP_SLICE: Duration = Duration::from_millis(100);
/// The firmware rejects a speed write issued immediately after switching
/// to manual mode.
const MODE_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    /// Temperature fetch failed; server treated as offline.
    Offline,
    Completed,
}

pub struct ServerWorker {
    alias: String,
    ip: String,
    thresholds: ThresholdConfig,
    patterns: TempPatterns,
    check_interval: Duration,
    gateway: Arc<dyn BmcGateway>,
    publisher: Box<dyn StatusPublisher>,
    status: SharedStatus,
    running: Arc<AtomicBool>,
    identity: ServerIdentity,
}

impl ServerWorker {
    /// Build a worker from its config. Missing credentials or an invalid
    /// sensor pattern are fatal to this worker only; the caller logs and
    /// moves on to its peers.
    pub fn new(
        server: &ServerConfig,
        global: &GlobalSettings,
        gateway: Arc<dyn BmcGateway>,
        publisher: Box<dyn StatusPublisher>,
        status: SharedStatus,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        if !server.has_required_credentials() {
            bail!("iDRAC credentials not fully configured for '{}'", server.alias);
        }
        let patterns =
            TempPatterns::new(&server.cpu_pattern, &server.inlet_pattern, &server.exhaust_pattern)
                .with_context(|| format!("Invalid sensor pattern for '{}'", server.alias))?;

        Ok(Self {
            alias: server.alias.clone(),
            ip: server.idrac_ip.clone(),
            thresholds: server.thresholds.resolve(&global.default_thresholds),
            patterns,
            check_interval: Duration::from_secs(global.check_interval_seconds),
            gateway,
            publisher,
            status,
            running,
            identity: ServerIdentity::default(),
        })
    }

    pub async fn run(mut self) {
        self.initialize().await;

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            match self.run_cycle().await {
                CycleOutcome::Offline => {
                    self.sleep_cooperatively(OFFLINE_BACKOFF).await;
                }
                CycleOutcome::Completed => {
                    let sleep = self
                        .check_interval
                        .saturating_sub(started.elapsed())
                        .max(MIN_SLEEP);
                    debug!(
                        "[{}] Cycle took {:.2}s, sleeping {:.2}s",
                        self.alias,
                        started.elapsed().as_secs_f64(),
                        sleep.as_secs_f64()
                    );
                    self.sleep_cooperatively(sleep).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Resolve the server identity once, best-effort, and announce device
    /// metadata. A FRU failure leaves the identity Unknown and does not
    /// block startup.
    async fn initialize(&mut self) {
        info!("[{}] Initializing server worker", self.alias);
        match self.gateway.fetch_fru().await {
            Ok(fru) => {
                self.identity = parse_model_info(&fru);
                info!(
                    "[{}] Server identity: {} {}",
                    self.alias, self.identity.manufacturer, self.identity.model
                );
            }
            Err(e) => warn!("[{}] Could not retrieve FRU data: {}", self.alias, e),
        }
        self.publisher.announce_device(&self.identity).await;
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let temp_sdr = match self.gateway.fetch_sdr(SdrType::Temperature).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "[{}] Failed to retrieve data from iDRAC ({}). Server may be offline, retrying in {}s",
                    self.alias,
                    e,
                    OFFLINE_BACKOFF.as_secs()
                );
                self.publisher.set_availability(false).await;
                return CycleOutcome::Offline;
            }
        };
        self.publisher.set_availability(true).await;

        let temps = parse_temperatures(&temp_sdr, &self.patterns);

        // Fan and power failures are tolerated per-metric: the readings
        // stay absent this cycle but the server remains online.
        let fans = match self.gateway.fetch_sdr(SdrType::Fan).await {
            Ok(text) => parse_fan_rpms(&text),
            Err(e) => {
                warn!("[{}] Failed to retrieve fan data: {}", self.alias, e);
                Vec::new()
            }
        };
        let power = match self.gateway.fetch_sdr(SdrType::Current).await {
            Ok(text) => parse_power_consumption(&text),
            Err(e) => {
                warn!("[{}] Failed to retrieve power data: {}", self.alias, e);
                None
            }
        };

        let hottest = temps.hottest_cpu();
        let command = decide(hottest, &self.thresholds);
        info!(
            "[{}] Hottest CPU: {}, fan action: {}",
            self.alias,
            hottest.map_or("unknown".to_string(), |t| format!("{}°C", t)),
            command.display()
        );
        self.apply_fan_command(&command).await;

        let status = ServerStatus {
            alias: self.alias.clone(),
            ip: self.ip.clone(),
            cpu_temps_c: temps.cpu_temps.clone(),
            hottest_cpu_temp_c: hottest,
            inlet_temp_c: temps.inlet_temp,
            exhaust_temp_c: temps.exhaust_temp,
            power_consumption_watts: power,
            actual_fan_rpms: fans,
            target_fan_speed_percent: TargetFanSpeed::from(&command),
            last_updated: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        {
            let mut map = self.status.lock().await;
            map.insert(self.alias.clone(), status.clone());
        }
        self.publisher.publish_status(&status).await;

        CycleOutcome::Completed
    }

    /// Issue the decided command. A failed manual-mode switch skips the
    /// speed write (it could not take effect) but stays non-fatal; the
    /// next cycle re-attempts from scratch.
    async fn apply_fan_command(&self, command: &FanCommand) {
        match command {
            FanCommand::DellAuto(_) => {
                if let Err(e) = self.gateway.set_auto_fan_profile().await {
                    warn!("[{}] Failed to apply auto fan profile: {}", self.alias, e);
                }
            }
            FanCommand::StaticPercent(percent) => {
                if let Err(e) = self.gateway.enable_manual_fan_mode().await {
                    warn!(
                        "[{}] Failed to enable manual fan control, skipping speed write: {}",
                        self.alias, e
                    );
                    return;
                }
                tokio::time::sleep(MODE_SETTLE_DELAY).await;
                if let Err(e) = self.gateway.set_fan_duty_cycle(*percent).await {
                    warn!("[{}] Failed to set fan speed to {}%: {}", self.alias, percent, e);
                }
            }
        }
    }

    /// Final safety net: never leave a machine pinned at a stale manual
    /// speed after the controller exits.
    async fn shutdown(&mut self) {
        info!("[{}] Worker shutting down, reverting to Dell auto fans", self.alias);
        if let Err(e) = self.gateway.set_auto_fan_profile().await {
            warn!("[{}] Failed to restore auto fan profile on shutdown: {}", self.alias, e);
        }
        self.publisher.shutdown().await;
        info!("[{}] Worker cleanup complete", self.alias);
    }

    /// Sleep in short slices so a shutdown request is observed within one
    /// slice instead of a full interval.
    async fn sleep_cooperatively(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.running.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(SLEEP_SLICE)).await;
        }
    }
}
