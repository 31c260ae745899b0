use crate::latency::ProbeOutcome;
use std::fmt;

/// Reported in place of a delay when a single probe fails, and when no probe succeeded.
pub const PING_DELAY_TIMEOUT: u64 = 11000;
/// Reported when measurement could not be attempted at all.
pub const PING_DELAY_ERROR: u64 = 10000;

/// Final outcome of one measurement.
///
/// `Display` produces the `:`-delimited wire form. Error text is written as
/// is, so a `:` inside it is indistinguishable from a field separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    /// Tunnel or client could not be brought up: `10000::<error>`
    Fatal { error: String },
    /// No sample succeeded: `11000::<last_error>`
    TimedOut { last_error: String },
    /// `<average>:<country>:<last_error>`
    Measured {
        delay_ms: u64,
        country: String,
        last_error: String,
    },
}

impl Measurement {
    pub fn fatal(error: impl fmt::Display) -> Self {
        Measurement::Fatal {
            error: error.to_string(),
        }
    }

    /// Without a valid sample the outcome becomes [`Measurement::TimedOut`] and
    /// `country` is ignored.
    pub fn from_outcome(outcome: ProbeOutcome, country: String) -> Self {
        match outcome.average() {
            Some(delay_ms) => Measurement::Measured {
                delay_ms,
                country,
                last_error: outcome.last_error,
            },
            None => Measurement::TimedOut {
                last_error: outcome.last_error,
            },
        }
    }

    /// The leading numeric field
    pub fn code(&self) -> u64 {
        match self {
            Measurement::Fatal { .. } => PING_DELAY_ERROR,
            Measurement::TimedOut { .. } => PING_DELAY_TIMEOUT,
            Measurement::Measured { delay_ms, .. } => *delay_ms,
        }
    }

    pub fn error(&self) -> &str {
        match self {
            Measurement::Fatal { error } => error,
            Measurement::TimedOut { last_error } | Measurement::Measured { last_error, .. } => {
                last_error
            }
        }
    }

    pub fn country(&self) -> &str {
        match self {
            Measurement::Measured { country, .. } => country,
            _ => "",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Fatal { error } => write!(f, "{}::{}", PING_DELAY_ERROR, error),
            Measurement::TimedOut { last_error } => {
                write!(f, "{}::{}", PING_DELAY_TIMEOUT, last_error)
            }
            Measurement::Measured {
                delay_ms,
                country,
                last_error,
            } => write!(f, "{}:{}:{}", delay_ms, country, last_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_all_three_shapes() {
        assert_eq!(
            Measurement::fatal("core instance nil").to_string(),
            "10000::core instance nil"
        );
        assert_eq!(
            Measurement::TimedOut {
                last_error: "deadline exceeded".into()
            }
            .to_string(),
            "11000::deadline exceeded"
        );
        assert_eq!(
            Measurement::Measured {
                delay_ms: 123,
                country: "DE".into(),
                last_error: String::new()
            }
            .to_string(),
            "123:DE:"
        );
    }

    #[test]
    fn colons_in_errors_are_not_escaped() {
        let encoded = Measurement::TimedOut {
            last_error: "dial tcp: refused".into(),
        }
        .to_string();
        assert_eq!(encoded, "11000::dial tcp: refused");
    }

    #[test]
    fn empty_outcome_is_timed_out_with_no_error() {
        let measurement = Measurement::from_outcome(ProbeOutcome::default(), "US".into());
        assert_eq!(measurement.to_string(), "11000::");
        assert_eq!(measurement.country(), "");
    }
}
