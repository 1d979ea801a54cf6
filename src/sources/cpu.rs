//! Aggregate CPU counters from the kernel stat file.

use super::ReadError;
use crate::core::CpuSnapshot;

pub(crate) const STAT_PATH: &str = "proc/stat";

/// Minimum number of counters required after the `cpu` label.
const MIN_FIELDS: usize = 5;

/// Parses the first line of the stat file into a [`CpuSnapshot`].
///
/// Counters beyond the seventh are ignored; missing trailing counters (when
/// at least [`MIN_FIELDS`] are present) read as zero.
pub fn parse_cpu_stat(contents: &str) -> Result<CpuSnapshot, ReadError> {
    let line = contents
        .lines()
        .next()
        .ok_or_else(|| ReadError::malformed("cpu stat", "empty file"))?;
    let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
    if fields.len() < MIN_FIELDS {
        return Err(ReadError::malformed(
            "cpu stat",
            format!("expected at least {} counters, found {}", MIN_FIELDS, fields.len()),
        ));
    }

    let mut counters = [0u64; CpuSnapshot::FIELDS];
    for (slot, field) in counters.iter_mut().zip(fields.iter()) {
        *slot = field
            .parse()
            .map_err(|_| ReadError::malformed("cpu stat", format!("bad counter {:?}", field)))?;
    }
    Ok(CpuSnapshot::new(counters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let snap = parse_cpu_stat("cpu  4705 356 584 3699176 23060 0 277 0 0 0\n").unwrap();
        assert_eq!(snap.counters(), &[4705, 356, 584, 3699176, 23060, 0, 277]);
    }

    #[test]
    fn test_parse_pads_missing_trailing_counters() {
        let snap = parse_cpu_stat("cpu 1 2 3 4 5").unwrap();
        assert_eq!(snap.counters(), &[1, 2, 3, 4, 5, 0, 0]);
    }

    #[test]
    fn test_parse_rejects_short_line() {
        assert!(matches!(
            parse_cpu_stat("cpu 1 2 3 4"),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert!(parse_cpu_stat("cpu 1 2 x 4 5 6 7").is_err());
        assert!(parse_cpu_stat("").is_err());
    }
}
