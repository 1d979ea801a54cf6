//! Temperature sensors: thermal zones first, then hardware monitors.
//!
//! The battery fallback lives in [`super::battery`].

use super::{list_entries, read_first_line, ReadError};
use regex::Regex;
use std::path::Path;
use tracing::debug;

pub(crate) const THERMAL_DIR: &str = "sys/class/thermal";
pub(crate) const HWMON_DIR: &str = "sys/class/hwmon";

/// Zone types that name a CPU-like sensor.
pub(crate) fn preferred_zone_pattern() -> Regex {
    Regex::new(r"(?i)(cpu|ap|a7|a53|soc)").expect("static pattern compiles")
}

/// Parses a raw sensor value: millidegrees above 1000, whole degrees otherwise.
pub fn parse_temp_raw(contents: &str) -> Result<f64, ReadError> {
    let trimmed = contents.trim();
    let raw: i64 = trimmed
        .parse()
        .map_err(|_| ReadError::malformed("temperature", format!("bad value {:?}", trimmed)))?;
    if raw > 1000 {
        Ok(raw as f64 / 1000.0)
    } else {
        Ok(raw as f64)
    }
}

pub(crate) fn read_temp_file(path: &Path) -> Option<f64> {
    read_first_line(path)
        .and_then(|line| parse_temp_raw(&line))
        .ok()
}

fn zone_index(path: &Path) -> u64 {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix("thermal_zone"))
        .and_then(|index| index.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Returns the first positive reading from a preferred zone, else the first
/// positive reading from any zone.
pub(crate) fn read_thermal_zones(dir: &Path, preferred: &Regex) -> Option<f64> {
    let mut zones = match list_entries(dir, |name| name.starts_with("thermal_zone")) {
        Ok(zones) => zones,
        Err(e) => {
            debug!(error = %e, "No thermal zones");
            return None;
        }
    };
    zones.sort_by_key(|zone| zone_index(zone));

    let mut first_valid = None;
    for zone in &zones {
        let Some(temp) = read_temp_file(&zone.join("temp")).filter(|t| *t > 0.0) else {
            continue;
        };
        first_valid.get_or_insert(temp);
        let zone_type = read_first_line(&zone.join("type")).unwrap_or_default();
        if preferred.is_match(&zone_type) {
            return Some(temp);
        }
    }
    first_valid
}

/// Returns the first positive `temp*_input` reading across all monitors.
pub(crate) fn read_hwmon_inputs(dir: &Path) -> Option<f64> {
    let monitors = match list_entries(dir, |_| true) {
        Ok(monitors) => monitors,
        Err(e) => {
            debug!(error = %e, "No hardware monitors");
            return None;
        }
    };

    monitors.iter().find_map(|monitor| {
        list_entries(monitor, |name| name.starts_with("temp") && name.ends_with("_input"))
            .ok()?
            .iter()
            .find_map(|input| read_temp_file(input).filter(|t| *t > 0.0))
    })
}
