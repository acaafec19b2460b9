use std::time::Duration;

use anyhow::anyhow;
use nom::character::complete::char;
use nom::combinator::{map_res, opt};
use nom::sequence::{preceded, tuple};

use crate::common::parser::{NomResult, consume_all, p_u32};

/// Wraps a type that is parsed from a CLI argument by a custom parser.
#[macro_export]
macro_rules! arg_wrapper {
    ($name:ident, $wrapped_type:ty, $parser:expr) => {
        #[derive(Clone, Debug)]
        pub struct $name($wrapped_type);

        impl ::std::str::FromStr for $name {
            type Err = ::anyhow::Error;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                ::std::result::Result::Ok(Self($parser(s)?))
            }
        }

        impl $name {
            pub fn get(&self) -> &$wrapped_type {
                &self.0
            }
            pub fn unpack(self) -> $wrapped_type {
                self.0
            }
        }
    };
}

// Allows specifying humantime format (2h, 3m, etc.)
crate::arg_wrapper!(ArgDuration, Duration, humantime::parse_duration);

/// Parses either `[[HH:]MM:]SS` or a humantime duration (`4h`, `30min`).
pub fn parse_hms_or_human_time(text: &str) -> anyhow::Result<Duration> {
    parse_hms_time(text)
        .or_else(|_| humantime::parse_duration(text))
        .map_err(|e| {
            anyhow!(
                "Could not parse time limit. Use either `HH:MM:SS` or humantime format (2hours): {:?}",
                e
            )
        })
}

fn p_hms_time(input: &str) -> NomResult<Duration> {
    map_res(
        tuple((
            p_u32,
            opt(preceded(char(':'), p_u32)),
            opt(preceded(char(':'), p_u32)),
        )),
        |parsed| match parsed {
            (seconds, None, None) => Ok(Duration::from_secs(seconds as u64)),
            (minutes, Some(seconds), None) => {
                Ok(Duration::from_secs(minutes as u64 * 60 + seconds as u64))
            }
            (hours, Some(minutes), Some(seconds)) => Ok(Duration::from_secs(
                hours as u64 * 3600 + minutes as u64 * 60 + seconds as u64,
            )),
            _ => Err(anyhow!("Invalid time specification")),
        },
    )(input)
}

/// Parses time strings in the format [[hh:]mm:]ss.
/// Individual time values may be zero padded.
pub fn parse_hms_time(input: &str) -> anyhow::Result<Duration> {
    consume_all(p_hms_time, input)
}

#[cfg(test)]
mod tests {
    use super::{parse_hms_or_human_time, parse_hms_time};
    use std::time::Duration;

    #[test]
    fn parse_hms_seconds() {
        assert_eq!(parse_hms_time("01").unwrap().as_secs(), 1);
    }

    #[test]
    fn parse_hms_minutes_seconds() {
        assert_eq!(parse_hms_time("02:05").unwrap().as_secs(), 125);
    }

    #[test]
    fn parse_hms_full() {
        assert_eq!(parse_hms_time("4:00:00").unwrap().as_secs(), 4 * 3600);
        assert_eq!(parse_hms_time("01:02:03").unwrap().as_secs(), 3723);
    }

    #[test]
    fn parse_hms_invalid() {
        assert!(parse_hms_time("1:").is_err());
        assert!(parse_hms_time("a:b").is_err());
    }

    #[test]
    fn parse_humantime_fallback() {
        assert_eq!(
            parse_hms_or_human_time("2h").unwrap(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            parse_hms_or_human_time("00:30:00").unwrap(),
            Duration::from_secs(1800)
        );
        assert!(parse_hms_or_human_time("soon").is_err());
    }
}
