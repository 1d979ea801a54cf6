//! Memory usage from the kernel meminfo file.

use super::ReadError;

pub(crate) const MEMINFO_PATH: &str = "proc/meminfo";

/// Returns `(total - available) / total * 100` from meminfo contents.
///
/// Scanning stops at `MemAvailable`. A non-positive total yields 0.0.
pub fn parse_meminfo(contents: &str) -> Result<f64, ReadError> {
    let mut total: u64 = 0;
    let mut available: u64 = 0;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb(rest)?;
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(rest)?;
            break;
        }
    }

    if total == 0 {
        return Ok(0.0);
    }
    let used = total.saturating_sub(available) as f64;
    Ok(used / total as f64 * 100.0)
}

fn parse_kb(value: &str) -> Result<u64, ReadError> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .map_err(|_| ReadError::malformed("meminfo", format!("bad value {:?}", value.trim())))
}
