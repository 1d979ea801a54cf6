// src/formatting.rs

use crate::core::Sample;
use serde::Serialize;

/// Rounds half up at the given number of decimals, so `0.25` becomes `0.3`
/// and `-0.05` becomes `0.0`.
pub fn round_half_up(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor + 0.5).floor() / factor
}

/// Formats a sample as the single-line chat message.
///
/// `[h:mm AM] [yyyy-MM-dd HH:mm:ss] NOTIFICATION [Camera name] MEM: x% | temp=y'C | Battery: z% | Voltage: v.vvV`
pub fn format_text_line(sample: &Sample) -> String {
    let short = sample.timestamp.format("%-I:%M %p");
    let full = sample.timestamp.format("%Y-%m-%d %H:%M:%S");
    let temp = match sample.temp_c {
        Some(t) => format!("temp={:.1}'C", t),
        None => "temp=N/A".to_string(),
    };
    format!(
        "[{}] [{}] NOTIFICATION [Camera {}] MEM: {:.1}% | {} | Battery: {}% | Voltage: {:.2}V",
        short,
        full,
        sample.device.display_name(),
        sample.memory_pct,
        temp,
        sample.battery.level,
        sample.battery.voltage_mv as f64 / 1000.0,
    )
}

/// The structured document posted to the API sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPayload {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub timestamp_ms: i64,
    pub memory_pct: f64,
    #[serde(rename = "tempC", skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    pub battery_pct: u32,
    pub voltage_v: f64,
    #[serde(flatten)]
    pub location: Option<LocationFields>,
}

/// Location keys, present only when a fix with coordinates exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFields {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ApiPayload {
    /// Builds the payload, rounding coordinates to five decimals.
    pub fn from_sample(sample: &Sample) -> Self {
        let location = sample.location.as_ref().and_then(|fix| {
            let (lat, lon) = fix.coordinates()?;
            Some(LocationFields {
                lat: round_half_up(lat, 5),
                lon: round_half_up(lon, 5),
                accuracy: fix.accuracy,
                provider: fix.provider.clone(),
            })
        });

        Self {
            device_id: sample.device.id.clone(),
            device_name: sample.device.name.clone(),
            timestamp_ms: sample.timestamp.timestamp_millis(),
            memory_pct: sample.memory_pct,
            temp_c: sample.temp_c,
            battery_pct: sample.battery.level,
            voltage_v: sample.battery.voltage_mv as f64 / 1000.0,
            location,
        }
    }
}

/// The token registration document posted to the API sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRegistration<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device_id: &'a str,
    pub fcm_token: &'a str,
}

impl<'a> TokenRegistration<'a> {
    pub fn new(device_id: &'a str, token: &'a str) -> Self {
        Self {
            kind: "registerToken",
            device_id,
            fcm_token: token,
        }
    }
}
