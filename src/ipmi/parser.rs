//! SDR and FRU text parsers.
//!
//! ipmitool's `sdr type <...>` output is pipe-delimited and varies across
//! BMC firmware revisions, so sensor categorization deliberately uses
//! substring regex search rather than full-line matches. Malformed lines
//! are skipped, never raised: a poll cycle degrades to partial readings
//! and the caller decides what to do with the gaps.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::ipmi::types::{FanReading, ServerIdentity, TemperatureSet};

// Example line: Inlet Temp       | 04h | ok  |  7.1 | 24 degrees C
// Status tokens outside the known set mean the sensor is absent, not broken.
static TEMP_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(.*?)\s*\|\s*[\da-fA-F]+h\s*\|\s*(?:ok|ns|nr|cr|u|\[Unknown\])\s*.*?\|\s*([-+]?\d*\.?\d+)\s*(?:degrees C|C)",
    )
    .expect("temperature line regex is valid")
});

// Example line: Fan1A Tach       | 30h | ok  |  7.1 | 2040 RPM
// Name capture is permissive; the RPM unit is the real filter.
static FAN_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(.*?)\s*\|\s*[\da-fA-F]+h\s*\|\s*(?:ok|ns|nr|cr|u|\[Unknown\])\s*.*?\|\s*([\d.]+)\s*RPM",
    )
    .expect("fan line regex is valid")
});

// Example line: Pwr Consumption  | 77h | ok  |  7.1 | 196 Watts
static POWER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(Pwr Consumption.*?)\s*\|\s*[\da-fA-F]+h\s*\|\s*(?:ok|ns|nr|cr|u|\[Unknown\])\s*.*?\|\s*([\d.]+)\s*Watts",
    )
    .expect("power line regex is valid")
});

/// Compiled sensor-name categorization patterns. A blank pattern compiles
/// to `None` and never matches anything.
#[derive(Debug, Clone)]
pub struct TempPatterns {
    cpu: Option<Regex>,
    inlet: Option<Regex>,
    exhaust: Option<Regex>,
}

impl TempPatterns {
    /// Compile the three user-supplied pattern fragments case-insensitively.
    /// An invalid pattern is a configuration error and fails the whole set.
    pub fn new(cpu: &str, inlet: &str, exhaust: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            cpu: compile_fragment(cpu)?,
            inlet: compile_fragment(inlet)?,
            exhaust: compile_fragment(exhaust)?,
        })
    }
}

fn compile_fragment(fragment: &str) -> Result<Option<Regex>, regex::Error> {
    if fragment.trim().is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("(?i){}", fragment)).map(Some)
}

fn matches(pattern: &Option<Regex>, name: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(name))
}

/// Truncate toward zero, mirroring an integer cast of the float value
/// ("43.9" parses to 43, not 44).
fn coerce_int(raw: &str) -> Option<i32> {
    raw.parse::<f64>().ok().map(|v| v as i32)
}

/// Parse a temperature SDR dump into a categorized [`TemperatureSet`].
///
/// Per line, categories are tried in fixed priority: inlet (if not yet
/// found), exhaust (if not yet found), then generic CPU. The first inlet or
/// exhaust match is never overwritten by a later line. A name that matches
/// an already-claimed inlet/exhaust pattern is excluded from the CPU list
/// even when the CPU pattern would also match it.
pub fn parse_temperatures(sdr_text: &str, patterns: &TempPatterns) -> TemperatureSet {
    let mut temps = TemperatureSet::default();
    let mut inlet_found = false;
    let mut exhaust_found = false;

    for line in sdr_text.lines() {
        let line = line.trim();
        let Some(caps) = TEMP_LINE_RE.captures(line) else {
            trace!("Line did not match temperature shape: {}", line);
            continue;
        };

        let name = caps[1].trim();
        let Some(value) = coerce_int(&caps[2]) else {
            warn!("Could not parse numeric temperature ('{}') from: {}", &caps[2], line);
            continue;
        };

        if !inlet_found && matches(&patterns.inlet, name) {
            temps.inlet_temp = Some(value);
            inlet_found = true;
            debug!("Matched inlet: '{}' at {}°C", name, value);
            continue;
        }
        if !exhaust_found && matches(&patterns.exhaust, name) {
            temps.exhaust_temp = Some(value);
            exhaust_found = true;
            debug!("Matched exhaust: '{}' at {}°C", name, value);
            continue;
        }
        if matches(&patterns.cpu, name) {
            let already_claimed = (inlet_found && matches(&patterns.inlet, name))
                || (exhaust_found && matches(&patterns.exhaust, name));
            if !already_claimed {
                temps.cpu_temps.push(value);
                debug!("Matched CPU sensor: '{}' at {}°C", name, value);
            }
        }
    }

    if temps.cpu_temps.is_empty() {
        debug!("No CPU temperature sensors matched this cycle");
    }
    temps
}

/// Parse a fan SDR dump into readings, preserving source order.
pub fn parse_fan_rpms(sdr_text: &str) -> Vec<FanReading> {
    let mut fans = Vec::new();

    for line in sdr_text.lines() {
        let line = line.trim();
        let Some(caps) = FAN_LINE_RE.captures(line) else {
            continue;
        };
        let name = caps[1].trim().to_string();
        match caps[2].parse::<f64>() {
            Ok(rpm) => {
                debug!("Matched fan: '{}' at {} RPM", name, rpm as u32);
                fans.push(FanReading { name, rpm: rpm as u32 });
            }
            Err(_) => warn!("Could not parse numeric RPM ('{}') from: {}", &caps[2], line),
        }
    }

    fans
}

/// Find the first "Pwr Consumption" reading in Watts. Later power or
/// current sensors are ignored once one matches.
pub fn parse_power_consumption(sdr_text: &str) -> Option<u32> {
    for line in sdr_text.lines() {
        let line = line.trim();
        let Some(caps) = POWER_LINE_RE.captures(line) else {
            continue;
        };
        match caps[2].parse::<f64>() {
            Ok(watts) => {
                debug!("Matched power: '{}' at {} Watts", caps[1].trim(), watts as u32);
                return Some(watts as u32);
            }
            Err(_) => warn!("Could not parse numeric power ('{}') from: {}", &caps[2], line),
        }
    }
    None
}

/// Extract manufacturer and model from `ipmitool fru` output.
///
/// `Product Manufacturer`/`Product Name` win; `Board Mfg`/`Board Product`
/// are fallbacks for chassis that omit the product fields. Any
/// manufacturer string containing "dell" is normalized to the literal
/// `DELL` so downstream device metadata stays consistent.
pub fn parse_model_info(fru_text: &str) -> ServerIdentity {
    let mut identity = ServerIdentity::default();

    for line in fru_text.lines() {
        let lower = line.to_lowercase();
        if identity.manufacturer == "Unknown" && lower.contains("product manufacturer") {
            if let Some(value) = field_value(line) {
                identity.manufacturer = value;
            }
        } else if identity.model == "Unknown" && lower.contains("product name") {
            if let Some(value) = field_value(line) {
                identity.model = value;
            }
        }
    }

    if identity.manufacturer == "Unknown" {
        if let Some(value) = fru_text
            .lines()
            .filter(|l| l.to_lowercase().contains("board mfg"))
            .find_map(field_value)
        {
            identity.manufacturer = value;
        }
    }
    if identity.model == "Unknown" {
        if let Some(value) = fru_text
            .lines()
            .filter(|l| l.to_lowercase().contains("board product"))
            .find_map(field_value)
        {
            identity.model = value;
        }
    }

    if identity.manufacturer.to_lowercase().contains("dell") {
        identity.manufacturer = "DELL".to_string();
    }
    identity
}

// A field with no colon or an empty value stays unresolved so the board
// fallback can still fill it.
fn field_value(line: &str) -> Option<String> {
    let value = line.splitn(2, ':').nth(1)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDR_TEMPS: &str = "\
Inlet Temp       | 04h | ok  |  7.1 | 18 degrees C
Exhaust Temp     | 01h | ok  |  7.1 | 31 degrees C
Temp             | 0Eh | ok  |  3.1 | 43 degrees C
Temp             | 0Fh | ok  |  3.2 | 47 degrees C
";

    fn default_patterns() -> TempPatterns {
        TempPatterns::new("Temp", "Inlet Temp", "Exhaust Temp").unwrap()
    }

    #[test]
    fn categorizes_inlet_exhaust_and_cpus() {
        let temps = parse_temperatures(SDR_TEMPS, &default_patterns());
        assert_eq!(temps.inlet_temp, Some(18));
        assert_eq!(temps.exhaust_temp, Some(31));
        assert_eq!(temps.cpu_temps, vec![43, 47]);
        assert_eq!(temps.hottest_cpu(), Some(47));
    }

    #[test]
    fn inlet_claims_line_before_cpu_pattern() {
        // "Inlet Temp" also contains "Temp"; it must land in inlet only.
        let temps = parse_temperatures(
            "Inlet Temp | 04h | ok | 7.1 | 18 degrees C\n",
            &default_patterns(),
        );
        assert_eq!(temps.inlet_temp, Some(18));
        assert!(temps.cpu_temps.is_empty());
    }

    #[test]
    fn first_match_wins_for_singular_sensors() {
        let text = "\
Exhaust Temp | 01h | ok | 7.1 | 31 degrees C
Exhaust Temp | 02h | ok | 7.1 | 35 degrees C
";
        let temps = parse_temperatures(text, &default_patterns());
        assert_eq!(temps.exhaust_temp, Some(31));
    }

    #[test]
    fn duplicate_inlet_line_is_not_counted_as_cpu() {
        // Second inlet-named line arrives after inlet is claimed; the CPU
        // pattern would match it, but it stays excluded.
        let text = "\
Inlet Temp | 04h | ok | 7.1 | 18 degrees C
Inlet Temp | 05h | ok | 7.1 | 19 degrees C
";
        let temps = parse_temperatures(text, &default_patterns());
        assert_eq!(temps.inlet_temp, Some(18));
        assert!(temps.cpu_temps.is_empty());
    }

    #[test]
    fn truncates_instead_of_rounding() {
        let temps = parse_temperatures(
            "Temp | 0Eh | ok | 3.1 | 43.9 degrees C\n",
            &default_patterns(),
        );
        assert_eq!(temps.cpu_temps, vec![43]);
    }

    #[test]
    fn tolerates_malformed_and_unhealthy_lines() {
        let text = "\
Temp | 0Eh | fail | 3.1 | 43 degrees C
Temp | garbage
CMOS Battery     | 65h | ok  |  7.1 | Presence Detected
Temp | 0Fh | ok | 3.2 | 47 degrees C
";
        let temps = parse_temperatures(text, &default_patterns());
        assert_eq!(temps.cpu_temps, vec![47]);
    }

    #[test]
    fn accepts_bare_c_unit_and_negative_values() {
        let temps = parse_temperatures(
            "Temp | 0Eh | ok | 3.1 | -3.5 C\n",
            &default_patterns(),
        );
        assert_eq!(temps.cpu_temps, vec![-3]);
    }

    #[test]
    fn blank_pattern_never_matches() {
        let patterns = TempPatterns::new("Temp", "", "").unwrap();
        let temps = parse_temperatures(SDR_TEMPS, &patterns);
        assert_eq!(temps.inlet_temp, None);
        assert_eq!(temps.exhaust_temp, None);
        // With no inlet/exhaust pattern every line falls through to CPU.
        assert_eq!(temps.cpu_temps, vec![18, 31, 43, 47]);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(TempPatterns::new("Temp(", "Inlet", "Exhaust").is_err());
    }

    #[test]
    fn parsing_is_idempotent() {
        let patterns = default_patterns();
        let first = parse_temperatures(SDR_TEMPS, &patterns);
        let second = parse_temperatures(SDR_TEMPS, &patterns);
        assert_eq!(first, second);
    }

    #[test]
    fn parses_fans_in_source_order() {
        let text = "\
Fan1A Tach | 30h | ok | 7.1 | 2040 RPM
Fan2A Tach | 32h | ok | 7.1 | 2160 RPM
Fan Redundancy | 75h | ok | 7.1 | Fully Redundant
";
        let fans = parse_fan_rpms(text);
        assert_eq!(
            fans,
            vec![
                FanReading { name: "Fan1A Tach".to_string(), rpm: 2040 },
                FanReading { name: "Fan2A Tach".to_string(), rpm: 2160 },
            ]
        );
    }

    #[test]
    fn power_takes_only_the_first_match() {
        let text = "\
Pwr Consumption  | 77h | ok  |  7.1 | 100 Watts
Pwr Consumption  | 78h | ok  |  7.1 | 196 Watts
";
        assert_eq!(parse_power_consumption(text), Some(100));
    }

    #[test]
    fn power_absent_when_no_sensor_reports_watts() {
        let text = "Current 1 | 6Ah | ok | 10.1 | 0.80 Amps\n";
        assert_eq!(parse_power_consumption(text), None);
    }

    #[test]
    fn fru_product_fields_win_and_dell_is_normalized() {
        let fru = "\
Product Manufacturer  : Dell Inc.
Product Name          : PowerEdge R730
Board Mfg             : Dell Motherboards
Board Product         : 0H21J3
";
        let identity = parse_model_info(fru);
        assert_eq!(identity.manufacturer, "DELL");
        assert_eq!(identity.model, "PowerEdge R730");
    }

    #[test]
    fn fru_falls_back_to_board_fields() {
        let fru = "\
Board Mfg             : Quanta
Board Product         : S2B-MB
";
        let identity = parse_model_info(fru);
        assert_eq!(identity.manufacturer, "Quanta");
        assert_eq!(identity.model, "S2B-MB");
    }

    #[test]
    fn empty_product_value_falls_through_to_board_fields() {
        let fru = "\
Product Manufacturer  :
Product Name          :
Board Mfg             : Dell Inc.
Board Product         : 0H21J3
";
        let identity = parse_model_info(fru);
        assert_eq!(identity.manufacturer, "DELL");
        assert_eq!(identity.model, "0H21J3");
    }

    #[test]
    fn empty_fru_yields_unknowns() {
        let identity = parse_model_info("");
        assert_eq!(identity.manufacturer, "Unknown");
        assert_eq!(identity.model, "Unknown");
    }
}
