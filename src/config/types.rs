use std::fmt::{self, Display};
use std::sync::OnceLock;

use derive_more::{From, Into};
use regex_lite::{Regex, RegexBuilder};
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Deserializer};

/// A config duration: either an integer number of seconds or a string like `7d 12h 30m 15s`.
#[derive(From, Into, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        static REGEXP: OnceLock<Regex> = OnceLock::new();

        let regexp = REGEXP.get_or_init(|| {
            RegexBuilder::new(
                r"
                ^
                (?:(?<days>    \d+)d)? \s*
                (?:(?<hours>   \d+)h)? \s*
                (?:(?<minutes> \d+)m)? \s*
                (?:(?<seconds> \d+)s)?
                $",
            )
            .ignore_whitespace(true)
            .build()
            .unwrap()
        });
        let captures = regexp
            .captures(s.trim())
            .ok_or_else(|| format!("`{s}` is not a duration"))?;

        let mut any = false;
        let mut part = |name: &str| -> Result<u64, String> {
            let Some(m) = captures.name(name) else {
                return Ok(0);
            };
            any = true;

            m.as_str()
                .parse::<u64>()
                .map_err(|e| format!("could not parse {name} (`{}`): {e}", m.as_str()))
        };

        let days = part("days")?;
        let hours = part("hours")?;
        let minutes = part("minutes")?;
        let seconds = part("seconds")?;

        if !any {
            return Err(format!("`{s}` is not a duration"));
        }

        days.checked_mul(24)
            .and_then(|h| h.checked_add(hours))
            .and_then(|h| h.checked_mul(60))
            .and_then(|m| m.checked_add(minutes))
            .and_then(|m| m.checked_mul(60))
            .and_then(|s| s.checked_add(seconds))
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration `{s}` is too large"))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();

        if total == 0 {
            return write!(f, "0s");
        }

        let parts = [
            (total / 86400, "d"),
            (total / 3600 % 24, "h"),
            (total / 60 % 60, "m"),
            (total % 60, "s"),
        ];
        let mut first = true;

        for (value, unit) in parts {
            if value == 0 {
                continue;
            }

            if !first {
                write!(f, " ")?;
            }

            write!(f, "{value}{unit}")?;
            first = false;
        }

        Ok(())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::parse(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(Duration::parse("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(Duration::parse("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(
            Duration::parse("1d 2h 3m 4s").unwrap(),
            Duration::from_secs(86400 + 2 * 3600 + 3 * 60 + 4),
        );
        assert_eq!(Duration::parse("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Duration::parse("").is_err());
        assert!(Duration::parse("5 minutes").is_err());
        assert!(Duration::parse("3m 1h").is_err());
        assert!(Duration::parse("99999999999999999999d").is_err());
    }

    #[test]
    fn displays_in_the_parseable_form() {
        assert_eq!(Duration::from_secs(0).to_string(), "0s");
        assert_eq!(Duration::from_secs(7 * 86400).to_string(), "7d");
        assert_eq!(Duration::from_secs(3 * 86400 + 61).to_string(), "3d 1m 1s");

        let d = Duration::from_secs(93784);
        assert_eq!(Duration::parse(&d.to_string()).unwrap(), d);
    }
}
