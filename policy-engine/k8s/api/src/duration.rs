use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A duration in the string form used by mesh resources, e.g. `30s`, `1.5s`, `100ms` or `1h30m`.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("durations must not be negative")]
    Negative,

    #[error("duration is too large")]
    Overflow,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl MeshDuration {
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for MeshDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<MeshDuration> for Duration {
    fn from(MeshDuration(duration): MeshDuration) -> Self {
        duration
    }
}

impl fmt::Debug for MeshDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for MeshDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for MeshDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn unit(unit: &str) -> Result<Duration, ParseError> {
            const MINUTE: Duration = Duration::from_secs(60);
            match unit {
                "ns" => Ok(Duration::from_nanos(1)),
                // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
                "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
                "ms" => Ok(Duration::from_millis(1)),
                "s" => Ok(Duration::from_secs(1)),
                "m" => Ok(MINUTE),
                "h" => Ok(MINUTE * 60),
                _ => Err(ParseError::InvalidUnit),
            }
        }

        let s = s.trim();
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.trim_start_matches('+');
        if rest == "0" {
            return Ok(Self::default());
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (magnitude, tail) = rest.split_at(unit_start);
            let magnitude = magnitude.parse::<f64>()?;
            if magnitude.is_sign_negative() {
                return Err(ParseError::Negative);
            }
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (u, tail) = tail.split_at(unit_end);
            let part = Duration::try_from_secs_f64(unit(u)?.as_secs_f64() * magnitude)
                .map_err(|_| ParseError::Overflow)?;
            total = total.checked_add(part).ok_or(ParseError::Overflow)?;
            rest = tail;
        }

        Ok(Self(total))
    }
}

impl Serialize for MeshDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MeshDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl de::Visitor<'_> for Visitor {
            type Value = MeshDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration string such as `30s` or `100ms`")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse::<MeshDuration>().map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

impl schemars::JsonSchema for MeshDuration {
    fn schema_name() -> String {
        "MeshDuration".to_owned()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            format: None,
            ..Default::default()
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mesh_durations() {
        const MINUTE: Duration = Duration::from_secs(60);
        let cases: &[(&str, Duration)] = &[
            ("0", Duration::ZERO),
            ("0s", Duration::ZERO),
            ("5s", Duration::from_secs(5)),
            ("+5s", Duration::from_secs(5)),
            ("1.5s", Duration::from_millis(1500)),
            (".5s", Duration::from_millis(500)),
            ("100ms", Duration::from_millis(100)),
            ("250us", Duration::from_micros(250)),
            ("10ns", Duration::from_nanos(10)),
            ("15m", 15 * MINUTE),
            ("1h30m", 90 * MINUTE),
            ("2m3.5s", 2 * MINUTE + Duration::from_millis(3500)),
        ];

        for (input, expected) in cases {
            let parsed = input.parse::<MeshDuration>().unwrap();
            assert_eq!(Duration::from(parsed), *expected, "{input}");
        }
    }

    #[test]
    fn rejects_invalid_durations() {
        assert_eq!("5".parse::<MeshDuration>(), Err(ParseError::NoUnit));
        assert_eq!("5d".parse::<MeshDuration>(), Err(ParseError::InvalidUnit));
        assert_eq!("-5s".parse::<MeshDuration>(), Err(ParseError::Negative));
        assert_eq!(
            "99999999999999999999h".parse::<MeshDuration>(),
            Err(ParseError::Overflow)
        );
        assert_eq!(
            "10000000000000000000s10000000000000000000s".parse::<MeshDuration>(),
            Err(ParseError::Overflow)
        );
        assert!(matches!(
            "abc".parse::<MeshDuration>(),
            Err(ParseError::NotANumber(_))
        ));
    }

    #[test]
    fn displays_parseable_values() {
        for d in ["30s", "100ms", "1.5s"] {
            let parsed = d.parse::<MeshDuration>().unwrap();
            assert_eq!(parsed.to_string().parse::<MeshDuration>().unwrap(), parsed);
        }
    }
}
