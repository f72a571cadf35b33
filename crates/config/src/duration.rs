//! Human-readable durations: `"168h"`, `"7d"`, `"1h30m"`, `"90s"`.

use serde::de::{self, Deserializer, Visitor};
use std::fmt;
use std::time::Duration;

const UNITS: [(char, u64); 4] = [('d', 24 * 60 * 60), ('h', 60 * 60), ('m', 60), ('s', 1)];

/// Parse a sequence of `<number><unit>` pairs, units being `d`, `h`, `m` or
/// `s`.
///
/// # Examples
///
/// ```
/// use pkgdex_config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(90 * 60)));
/// assert!(parse_duration("1 week").is_err());
/// ```
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total: u64 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in {text:?}"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| format!("number too large in {text:?}"))?;
        let mut chars = rest[digits..].chars();
        let Some(unit) = chars.next() else {
            return Err(format!("missing unit in {text:?} (use d, h, m or s)"));
        };
        let Some((_, seconds)) = UNITS.iter().find(|(name, _)| *name == unit) else {
            return Err(format!("unknown unit {unit:?} in {text:?} (use d, h, m or s)"));
        };
        total = value
            .checked_mul(*seconds)
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(|| format!("duration {text:?} is too long"))?;
        rest = chars.as_str();
    }
    Ok(Duration::from_secs(total))
}

/// Format `duration` in the largest units that represent it exactly.
pub fn format_duration(duration: Duration) -> String {
    let mut seconds = duration.as_secs();
    if seconds == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in UNITS {
        if seconds >= size {
            out.push_str(&(seconds / size).to_string());
            out.push(unit);
            seconds %= size;
        }
    }
    out
}

/// Accepts a duration string, or a plain number of seconds (which is what
/// numeric environment variables turn into).
pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"168h\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
