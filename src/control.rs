//! Fan control decision engine.
//!
//! A pure, stateless tier lookup with no hysteresis: a temperature
//! oscillating across a threshold boundary will flip the commanded state
//! every cycle. That matches the deployed behavior and is kept as-is.

use crate::config::types::ThresholdConfig;

/// Why the controller is ceding control back to the BMC's own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReason {
    /// No CPU temperature could be determined; treat as a sensor or
    /// communication fault and let the firmware drive the fans.
    Safety,
    /// Hottest CPU at or above the critical threshold; the firmware's
    /// adaptive profile is safer than a static speed that could go stale.
    Critical,
}

/// The action to issue to the BMC this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanCommand {
    DellAuto(AutoReason),
    StaticPercent(u8),
}

impl FanCommand {
    /// Human-readable label used on the status and telemetry surfaces.
    pub fn display(&self) -> String {
        match self {
            FanCommand::DellAuto(AutoReason::Safety) => "Dell Auto (Safety)".to_string(),
            FanCommand::DellAuto(AutoReason::Critical) => "Dell Auto (Critical)".to_string(),
            FanCommand::StaticPercent(p) => format!("{}%", p),
        }
    }
}

/// Decide the fan profile for this cycle from the hottest CPU temperature.
///
/// Tiers are evaluated strictly in this order; with inverted thresholds
/// (critical below low) the critical check still wins, which is the
/// defined degenerate behavior for out-of-order configuration.
pub fn decide(hottest_cpu_c: Option<i32>, thresholds: &ThresholdConfig) -> FanCommand {
    let Some(temp) = hottest_cpu_c else {
        return FanCommand::DellAuto(AutoReason::Safety);
    };
    let temp = temp as f64;

    if temp >= thresholds.critical_temp_threshold_c {
        FanCommand::DellAuto(AutoReason::Critical)
    } else if temp >= thresholds.low_temp_threshold_c {
        FanCommand::StaticPercent(thresholds.high_temp_fan_percent)
    } else {
        FanCommand::StaticPercent(thresholds.base_fan_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig {
            base_fan_percent: 20,
            low_temp_threshold_c: 45.0,
            high_temp_fan_percent: 50,
            critical_temp_threshold_c: 65.0,
        }
    }

    #[test]
    fn absent_temperature_cedes_to_firmware() {
        assert_eq!(decide(None, &thresholds()), FanCommand::DellAuto(AutoReason::Safety));
    }

    #[test]
    fn monotonic_tiers() {
        let t = thresholds();
        assert_eq!(decide(Some(44), &t), FanCommand::StaticPercent(20));
        assert_eq!(decide(Some(45), &t), FanCommand::StaticPercent(50));
        assert_eq!(decide(Some(64), &t), FanCommand::StaticPercent(50));
        assert_eq!(decide(Some(65), &t), FanCommand::DellAuto(AutoReason::Critical));
        assert_eq!(decide(Some(90), &t), FanCommand::DellAuto(AutoReason::Critical));
    }

    #[test]
    fn inverted_thresholds_still_check_critical_first() {
        let t = ThresholdConfig {
            base_fan_percent: 20,
            low_temp_threshold_c: 65.0,
            high_temp_fan_percent: 50,
            critical_temp_threshold_c: 45.0,
        };
        // Anything at or above the (lower) critical threshold goes auto,
        // so the high tier is unreachable. Degenerate but defined.
        assert_eq!(decide(Some(50), &t), FanCommand::DellAuto(AutoReason::Critical));
        assert_eq!(decide(Some(40), &t), FanCommand::StaticPercent(20));
    }

    #[test]
    fn display_labels() {
        assert_eq!(FanCommand::DellAuto(AutoReason::Safety).display(), "Dell Auto (Safety)");
        assert_eq!(FanCommand::DellAuto(AutoReason::Critical).display(), "Dell Auto (Critical)");
        assert_eq!(FanCommand::StaticPercent(30).display(), "30%");
    }
}
