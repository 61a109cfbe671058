//! Go-style duration strings: `300ms`, `1.5h`, `2h45m`, `1m30s250ms`.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};

const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Parse a sequence of `<number><unit>` terms. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_len];
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| {
                if unit.is_empty() {
                    anyhow!("invalid duration '{}': missing unit", input)
                } else {
                    anyhow!("invalid duration '{}': unknown unit '{}'", input, unit)
                }
            })?;
        let term = term_nanos(number, scale)
            .ok_or_else(|| anyhow!("invalid duration '{}': bad number '{}'", input, number))?;
        nanos = nanos
            .checked_add(term)
            .ok_or_else(|| anyhow!("invalid duration '{}': overflow", input))?;
    }

    let secs = u64::try_from(nanos / 1_000_000_000)
        .map_err(|_| anyhow!("invalid duration '{}': overflow", input))?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// `number` (digits with an optional fraction) times `scale` nanoseconds.
fn term_nanos(number: &str, scale: u128) -> Option<u128> {
    let (int, frac) = number.split_once('.').unwrap_or((number, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    let digits = |s: &str| -> Option<u128> {
        if s.is_empty() {
            Some(0)
        } else if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };
    let mut total = digits(int)?.checked_mul(scale)?;
    // Extra fractional digits are below nanosecond precision.
    let frac = &frac[..frac.len().min(18)];
    if !frac.is_empty() {
        let denom = 10u128.pow(frac.len() as u32);
        total = total.checked_add(digits(frac)?.checked_mul(scale)? / denom)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_combined_and_fractional() {
        assert_eq!(
            parse_duration("1h2m3s").unwrap(),
            Duration::from_secs(3600 + 120 + 3)
        );
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 0 ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_overflow_is_an_error() {
        // Each term fits in u128 nanoseconds; their sum does not.
        let huge = format!("2{}ns", "0".repeat(38));
        let chained = format!("{}{}", huge, huge);
        let err = parse_duration(&chained).unwrap_err();
        assert!(err.to_string().contains("overflow"), "{}", err);
        assert!(parse_duration("18446744073709551616s").is_err());
    }
}
