//! Readers for OS-level telemetry
//!
//! All readers work against a filesystem root (normally `/`) so that the
//! procfs and sysfs layouts can be reproduced in a temporary directory for
//! tests. Parsing is split from I/O: each submodule exposes pure `parse_*`
//! functions returning [`ReadError`] and the [`SysfsReader`] turns those
//! errors into the absent/zero values the pipeline expects, logging them on
//! the way.

pub mod battery;
pub mod cpu;
pub mod identity;
pub mod memory;
pub mod thermal;

use crate::core::{BatteryInfo, CpuSnapshot, MetricsSource};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use identity::resolve_device_name;

/// Failures encountered while reading a telemetry source.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("source {path:?} unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

impl ReadError {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }
}

/// Reads a whole file, tagging I/O failures with the path.
pub(crate) fn read_source(path: &Path) -> Result<String, ReadError> {
    fs::read_to_string(path).map_err(|source| ReadError::Unavailable {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the first line of a file, without its terminator.
pub(crate) fn read_first_line(path: &Path) -> Result<String, ReadError> {
    let contents = read_source(path)?;
    Ok(contents.lines().next().unwrap_or_default().to_string())
}

/// Lists the entries of `dir` whose file name satisfies `keep`, sorted by name.
pub(crate) fn list_entries(
    dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, ReadError> {
    let entries = fs::read_dir(dir).map_err(|source| ReadError::Unavailable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(&keep))
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    Ok(paths)
}

/// [`MetricsSource`] backed by procfs and sysfs under a configurable root.
#[derive(Debug, Clone)]
pub struct SysfsReader {
    root: PathBuf,
    preferred_zone: Regex,
}

impl SysfsReader {
    /// Creates a reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preferred_zone: thermal::preferred_zone_pattern(),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

impl Default for SysfsReader {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MetricsSource for SysfsReader {
    fn cpu_stat(&self) -> Option<CpuSnapshot> {
        match read_source(&self.path(cpu::STAT_PATH)).and_then(|s| cpu::parse_cpu_stat(&s)) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(error = %e, "CPU counters unavailable");
                None
            }
        }
    }

    fn mem_usage_percent(&self) -> f64 {
        match read_source(&self.path(memory::MEMINFO_PATH)).and_then(|s| memory::parse_meminfo(&s)) {
            Ok(pct) => pct,
            Err(e) => {
                debug!(error = %e, "Memory usage unavailable");
                0.0
            }
        }
    }

    fn temp_celsius(&self) -> Option<f64> {
        thermal::read_thermal_zones(&self.path(thermal::THERMAL_DIR), &self.preferred_zone)
            .or_else(|| thermal::read_hwmon_inputs(&self.path(thermal::HWMON_DIR)))
            .or_else(|| {
                battery::read_battery_temp(
                    &self.path(battery::POWER_SUPPLY_DIR),
                    &self.path(battery::FALLBACK_TEMP_PATH),
                )
            })
    }

    fn battery(&self) -> BatteryInfo {
        match battery::read_uevent(&self.path(battery::POWER_SUPPLY_DIR)) {
            Ok(props) => battery::battery_from_uevent(&props),
            Err(e) => {
                debug!(error = %e, "Battery state unavailable");
                BatteryInfo::default()
            }
        }
    }

    fn device_id(&self) -> String {
        identity::device_id(&self.root)
    }
}
