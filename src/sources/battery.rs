//! Battery state from the power-supply class.
//!
//! The `uevent` file of a battery supply holds every property in one read,
//! which makes it the equivalent of a battery status broadcast: level,
//! voltage, status and temperature all come from the same snapshot.

use super::thermal::read_temp_file;
use super::{list_entries, read_first_line, read_source, ReadError};
use crate::core::BatteryInfo;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) const POWER_SUPPLY_DIR: &str = "sys/class/power_supply";
pub(crate) const FALLBACK_TEMP_PATH: &str = "sys/class/power_supply/battery/temp";

/// Properties from a supply's `uevent`, keyed without the `POWER_SUPPLY_` prefix.
pub type UeventProps = HashMap<String, String>;

/// Parses `KEY=value` lines, stripping the `POWER_SUPPLY_` prefix from keys.
pub fn parse_uevent(contents: &str) -> UeventProps {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim();
            let key = key.strip_prefix("POWER_SUPPLY_").unwrap_or(key);
            (key.to_string(), value.trim().to_string())
        })
        .collect()
}

fn find_battery(dir: &Path) -> Result<PathBuf, ReadError> {
    list_entries(dir, |_| true)?
        .into_iter()
        .find(|supply| {
            read_first_line(&supply.join("type"))
                .map(|kind| kind.trim().eq_ignore_ascii_case("battery"))
                .unwrap_or(false)
        })
        .ok_or_else(|| ReadError::malformed("power supply", "no battery supply present"))
}

/// Reads the property snapshot of the first battery supply.
pub(crate) fn read_uevent(dir: &Path) -> Result<UeventProps, ReadError> {
    let battery = find_battery(dir)?;
    read_source(&battery.join("uevent")).map(|contents| parse_uevent(&contents))
}

fn prop<T: std::str::FromStr>(props: &UeventProps, key: &str) -> Option<T> {
    props.get(key).and_then(|value| value.parse().ok())
}

/// Derives [`BatteryInfo`] from a property snapshot.
///
/// The level is `level * 100 / scale`; `CAPACITY` is already a percentage,
/// otherwise `CHARGE_NOW`/`CHARGE_FULL` (or the `ENERGY_` pair) serve as
/// level and scale. Voltage arrives in microvolts.
pub fn battery_from_uevent(props: &UeventProps) -> BatteryInfo {
    let (level, scale): (i64, i64) = match prop::<i64>(props, "CAPACITY") {
        Some(capacity) => (capacity, 100),
        None => ["CHARGE", "ENERGY"]
            .iter()
            .find_map(|kind| {
                Some((
                    prop(props, &format!("{kind}_NOW"))?,
                    prop(props, &format!("{kind}_FULL"))?,
                ))
            })
            .unwrap_or((-1, -1)),
    };
    let level = if level >= 0 && scale > 0 {
        (level * 100 / scale).clamp(0, u32::MAX as i64) as u32
    } else {
        0
    };

    let voltage_mv = prop::<i64>(props, "VOLTAGE_NOW")
        .filter(|uv| *uv > 0)
        .map(|uv| (uv / 1000) as u32)
        .unwrap_or(0);

    let charging = props
        .get("STATUS")
        .map(|status| {
            status.eq_ignore_ascii_case("charging") || status.eq_ignore_ascii_case("full")
        })
        .unwrap_or(false);

    BatteryInfo {
        level,
        voltage_mv,
        charging,
    }
}

/// Battery temperature: the live property snapshot (tenths of a degree),
/// then the fixed sysfs file.
pub(crate) fn read_battery_temp(supply_dir: &Path, fallback: &Path) -> Option<f64> {
    match read_uevent(supply_dir) {
        Ok(props) => {
            if let Some(tenths) = prop::<i64>(&props, "TEMP") {
                return Some(tenths as f64 / 10.0);
            }
        }
        Err(e) => debug!(error = %e, "Battery snapshot unavailable for temperature"),
    }
    read_temp_file(fallback)
}
