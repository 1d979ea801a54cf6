//! Core domain types and service traits for StatWatch
//!
//! This module defines the fundamental data structures that flow through a
//! tick (counters, battery state, location fixes, the assembled sample) and
//! the trait contracts that separate the sampling pipeline from the OS and
//! from the outbound sinks.

use crate::notification::SendError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Aggregate CPU counters from the first line of the kernel stat file.
///
/// Field order: user, nice, system, idle, iowait, irq, softirq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSnapshot {
    counters: [u64; CpuSnapshot::FIELDS],
}

impl CpuSnapshot {
    /// Number of counters retained from the stat line.
    pub const FIELDS: usize = 7;

    pub fn new(counters: [u64; Self::FIELDS]) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> &[u64; Self::FIELDS] {
        &self.counters
    }

    /// Ticks spent idle or waiting on I/O.
    pub fn idle_ticks(&self) -> u64 {
        self.counters[3] + self.counters[4]
    }

    /// Sum of all retained counters.
    pub fn total_ticks(&self) -> u64 {
        self.counters.iter().sum()
    }
}

/// Battery state read once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryInfo {
    /// Charge level in percent, 0 when unreadable.
    pub level: u32,
    /// Terminal voltage in millivolts, 0 when unreadable.
    pub voltage_mv: u32,
    /// True while charging or full.
    pub charging: bool,
}

/// A single location reading. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Horizontal accuracy in meters; smaller is better.
    pub accuracy: Option<f32>,
    pub provider: Option<String>,
}

impl LocationFix {
    /// Builds a fix with both coordinates set.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Returns the coordinate pair when both halves are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Accuracy used for ranking; a fix without one ranks last.
    pub fn ranking_accuracy(&self) -> f32 {
        self.accuracy.unwrap_or(f32::INFINITY)
    }
}

/// Stable device identity plus an optional human-friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceIdentity {
    /// The name when known, else the raw id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Everything gathered during one tick, ready for formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Local wall-clock time at sampling.
    pub timestamp: DateTime<FixedOffset>,
    pub cpu_percent: f64,
    /// Memory usage, already rounded to one decimal.
    pub memory_pct: f64,
    pub temp_c: Option<f64>,
    pub battery: BatteryInfo,
    pub device: DeviceIdentity,
    pub location: Option<LocationFix>,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Reads raw device telemetry.
///
/// Every method is infallible at this boundary: unavailable or malformed
/// sources are logged by the implementation and surface as absent or zero.
pub trait MetricsSource: Send + Sync {
    /// Aggregate CPU counters, `None` when the source is unavailable.
    fn cpu_stat(&self) -> Option<CpuSnapshot>;

    /// Memory usage percent (unrounded), 0.0 when unavailable.
    fn mem_usage_percent(&self) -> f64;

    /// Best available temperature in degrees Celsius.
    fn temp_celsius(&self) -> Option<f64>;

    /// Current battery state.
    fn battery(&self) -> BatteryInfo;

    /// Stable identifier for this device.
    fn device_id(&self) -> String;
}

/// Delivers a text line to a chat webhook.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Posts `text` to `webhook_url`. Succeeds only on a 2xx response.
    async fn post_text(&self, webhook_url: &str, text: &str) -> Result<(), SendError>;
}

/// Delivers a JSON document to a generic API endpoint.
#[async_trait]
pub trait ApiSink: Send + Sync {
    /// Posts `body` to `endpoint`, adding a bearer token when `api_key` is
    /// present and non-empty. Succeeds only on a 2xx response.
    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        api_key: Option<&str>,
    ) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_snapshot_derived_ticks() {
        let snap = CpuSnapshot::new([10, 2, 5, 100, 7, 1, 1]);
        assert_eq!(snap.idle_ticks(), 107);
        assert_eq!(snap.total_ticks(), 126);
    }

    #[test]
    fn test_location_fix_coordinates_require_both_halves() {
        assert_eq!(LocationFix::at(1.0, 2.0).coordinates(), Some((1.0, 2.0)));
        let half = LocationFix {
            latitude: Some(1.0),
            ..Default::default()
        };
        assert_eq!(half.coordinates(), None);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let unnamed = DeviceIdentity {
            id: "abc".to_string(),
            name: None,
        };
        assert_eq!(unnamed.display_name(), "abc");
        let named = DeviceIdentity {
            id: "abc".to_string(),
            name: Some("atom1".to_string()),
        };
        assert_eq!(named.display_name(), "atom1");
    }
}
