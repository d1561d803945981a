use anyhow::{anyhow, bail};
use std::time::Duration;

/// Parses a string duration & return it as [Duration].
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split_index = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| anyhow!("Invalid duration format: {}", s))?;

    let (value_str, suffix) = s.split_at(split_index);
    let value: u64 = value_str.parse().map_err(|_| anyhow!("Invalid duration value: {}", value_str))?;

    match suffix.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "min" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => bail!("Invalid duration suffix: {}. Expected 'ms', 's', 'min' or 'h'.", suffix),
    }
}

/// Parses a byte size such as `512M`, `1GB` or `64KiB`. Units are powers of 1024, a bare number
/// is a count of bytes.
pub fn parse_byte_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let split_index = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());

    let (value_str, suffix) = s.split_at(split_index);
    let value: u64 = value_str.parse().map_err(|_| anyhow!("Invalid byte size value: {:?}", value_str))?;

    let shift = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        _ => bail!("Invalid byte size suffix: {}. Expected 'B', 'K', 'M', 'G' or 'T'.", suffix),
    };

    value.checked_mul(1 << shift).ok_or_else(|| anyhow!("Byte size {s} does not fit in 64 bits"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("5min").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1 min").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("5h").unwrap(), Duration::from_secs(5 * 60 * 60));
        assert!(parse_duration("2x").is_err());
        assert!(parse_duration("200").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[rstest]
    #[case::bytes("4096", 4096)]
    #[case::bytes_suffix("10B", 10)]
    #[case::kib("64K", 64 * 1024)]
    #[case::mib("512M", 512 * 1024 * 1024)]
    #[case::mb_long("512MB", 512 * 1024 * 1024)]
    #[case::gib_lower("1gib", 1 << 30)]
    #[case::spaced("2 G", 2 << 30)]
    fn parse_byte_size_ok(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(parse_byte_size(input).unwrap(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::unit_only("MB")]
    #[case::bad_unit("12X")]
    #[case::negative("-1M")]
    #[case::fraction("1.5G")]
    #[case::overflow("99999999999T")]
    fn parse_byte_size_err(#[case] input: &str) {
        assert!(parse_byte_size(input).is_err());
    }
}
