//! ipmitool subprocess gateway.
//!
//! The small set of commands the controller needs from a Dell BMC: SDR
//! table fetches, FRU inventory, and the OEM raw writes for fan control.
//! Every failure mode (binary missing, non-zero exit, timeout) surfaces as
//! a [`GatewayError`] value; callers treat them uniformly as "no data".

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::types::ServerConfig;
use crate::ipmi::types::SdrType;

// Dell OEM raw command bytes, stable across iDRAC generations.
const RAW_AUTO_PROFILE: &[&str] = &["0x30", "0x30", "0x01", "0x01"];
const RAW_MANUAL_MODE: &[&str] = &["0x30", "0x30", "0x01", "0x00"];
const RAW_SET_DUTY_PREFIX: &[&str] = &["0x30", "0x30", "0x02", "0xff"];

const FRU_TIMEOUT_SECS: u64 = 20;
const RAW_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to invoke ipmitool: {0}")]
    Invocation(#[from] std::io::Error),
    #[error("ipmitool exited with {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },
    #[error("ipmitool timed out after {0}s")]
    Timeout(u64),
}

/// The IPMI operations the poll cycle depends on. Trait-shaped so worker
/// tests can script responses without a BMC.
#[async_trait]
pub trait BmcGateway: Send + Sync {
    async fn fetch_sdr(&self, sdr_type: SdrType) -> Result<String, GatewayError>;
    async fn fetch_fru(&self) -> Result<String, GatewayError>;
    async fn set_auto_fan_profile(&self) -> Result<(), GatewayError>;
    async fn enable_manual_fan_mode(&self) -> Result<(), GatewayError>;
    async fn set_fan_duty_cycle(&self, percent: u8) -> Result<(), GatewayError>;
}

pub struct IpmitoolGateway {
    base_args: Vec<String>,
    alias: String,
    dry_run: bool,
}

impl IpmitoolGateway {
    pub fn new(server: &ServerConfig, dry_run: bool) -> Self {
        let base_args = match server.conn_type.to_lowercase().as_str() {
            "local" | "open" => vec!["-I".into(), "open".into()],
            _ => vec![
                "-I".into(),
                "lanplus".into(),
                "-H".into(),
                server.idrac_ip.clone(),
                "-L".into(),
                "User".into(),
                "-U".into(),
                server.idrac_username.clone(),
                "-P".into(),
                server.idrac_password.clone(),
            ],
        };
        Self {
            base_args,
            alias: server.alias.clone(),
            dry_run,
        }
    }

    async fn run(&self, args: &[&str], timeout_secs: u64) -> Result<String, GatewayError> {
        debug!("[{}] Executing: ipmitool {}", self.alias, args.join(" "));

        let mut cmd = tokio::process::Command::new("ipmitool");
        cmd.args(&self.base_args).args(args);
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| GatewayError::Timeout(timeout_secs))??;

        if !output.status.success() {
            return Err(GatewayError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_raw(&self, bytes: &[&str], what: &str) -> Result<(), GatewayError> {
        if self.dry_run {
            info!("[{}] [DRY RUN] Would execute: ipmitool raw {}", self.alias, bytes.join(" "));
            return Ok(());
        }
        let mut args = vec!["raw"];
        args.extend_from_slice(bytes);
        self.run(&args, RAW_TIMEOUT_SECS).await?;
        debug!("[{}] {} command succeeded", self.alias, what);
        Ok(())
    }
}

/// Firmware takes the duty cycle as a single hex byte, 0x00-0x64.
/// Out-of-range values are clamped, never rejected.
fn duty_cycle_arg(percent: u8) -> String {
    format!("0x{:02x}", percent.min(100))
}

#[async_trait]
impl BmcGateway for IpmitoolGateway {
    async fn fetch_sdr(&self, sdr_type: SdrType) -> Result<String, GatewayError> {
        self.run(
            &["sdr", "type", sdr_type.as_arg()],
            sdr_type.timeout_secs(),
        )
        .await
    }

    async fn fetch_fru(&self) -> Result<String, GatewayError> {
        self.run(&["fru"], FRU_TIMEOUT_SECS).await
    }

    async fn set_auto_fan_profile(&self) -> Result<(), GatewayError> {
        info!("[{}] Applying Dell dynamic fan control profile", self.alias);
        self.run_raw(RAW_AUTO_PROFILE, "auto profile").await
    }

    async fn enable_manual_fan_mode(&self) -> Result<(), GatewayError> {
        self.run_raw(RAW_MANUAL_MODE, "manual mode").await
    }

    async fn set_fan_duty_cycle(&self, percent: u8) -> Result<(), GatewayError> {
        let hex = duty_cycle_arg(percent);
        info!("[{}] Setting fan duty cycle to {}% ({})", self.alias, percent.min(100), hex);
        let mut bytes: Vec<&str> = RAW_SET_DUTY_PREFIX.to_vec();
        bytes.push(&hex);
        self.run_raw(&bytes, "duty cycle").await
    }
}
