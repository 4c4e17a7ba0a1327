//! Pass/fail verdicts and the records loggers consume.

use crate::telemetry::{now_timestamp, Telemetry};
use std::fmt;

/// Outcome of a single bound check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// `lower <= value <= upper`
    Pass,
    /// Anything else, including NaN values.
    Fail,
}

impl Verdict {
    /// Judge `value` against the inclusive range `[lower, upper]`.
    pub fn judge(lower: f64, value: f64, upper: f64) -> Self {
        if lower <= value && value <= upper {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Upper-case label used in console and CSV output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable Pass/Fail judgment produced by a bound check.
///
/// Equality is structural over every field, verdict included, so a `Fail` never
/// equals a `Pass` with the same numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    verdict: Verdict,
    component_name: String,
    subcomponent_name: Option<String>,
    lower_bound: f64,
    value: f64,
    upper_bound: f64,
    timestamp: f64,
}

impl LogEvent {
    /// Build an event with an explicit verdict, stamped with the current time.
    pub fn new(
        verdict: Verdict,
        component_name: impl Into<String>,
        lower_bound: f64,
        value: f64,
        upper_bound: f64,
    ) -> Self {
        Self {
            verdict,
            component_name: component_name.into(),
            subcomponent_name: None,
            lower_bound,
            value,
            upper_bound,
            timestamp: now_timestamp(),
        }
    }

    /// A `Pass` event.
    pub fn pass(component_name: impl Into<String>, lower: f64, value: f64, upper: f64) -> Self {
        Self::new(Verdict::Pass, component_name, lower, value, upper)
    }

    /// A `Fail` event.
    pub fn fail(component_name: impl Into<String>, lower: f64, value: f64, upper: f64) -> Self {
        Self::new(Verdict::Fail, component_name, lower, value, upper)
    }

    /// Replace the timestamp.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a subcomponent name.
    pub fn with_subcomponent(mut self, name: impl Into<String>) -> Self {
        self.subcomponent_name = Some(name.into());
        self
    }

    /// Pass or fail.
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Shorthand for `verdict() == Verdict::Fail`.
    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }

    /// Name of the component that measured the value.
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Optional finer-grained part of the component.
    pub fn subcomponent_name(&self) -> Option<&str> {
        self.subcomponent_name.as_deref()
    }

    /// Lower bound, possibly `-inf`.
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    /// The measured value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Upper bound, possibly `inf`.
    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Anything a [`Logger`](crate::logging::Logger) accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A bound-check verdict.
    Event(LogEvent),
    /// A device sample.
    Telemetry(Telemetry),
}

impl Record {
    /// The verdict, when this record is an event.
    pub fn as_event(&self) -> Option<&LogEvent> {
        match self {
            Record::Event(e) => Some(e),
            Record::Telemetry(_) => None,
        }
    }

    /// The sample, when this record is telemetry.
    pub fn as_telemetry(&self) -> Option<&Telemetry> {
        match self {
            Record::Telemetry(t) => Some(t),
            Record::Event(_) => None,
        }
    }
}

impl From<LogEvent> for Record {
    fn from(value: LogEvent) -> Self {
        Record::Event(value)
    }
}

impl From<Telemetry> for Record {
    fn from(value: Telemetry) -> Self {
        Record::Telemetry(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        assert_eq!(
            LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0),
            LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0)
        );
        assert_ne!(
            LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0),
            LogEvent::pass("test", 0.0, 1.0, 2.0).at(0.0)
        );
        assert_ne!(
            LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0),
            LogEvent::fail("test", 0.0, 1.0, 3.0).at(0.0)
        );
        assert_ne!(
            LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0),
            LogEvent::fail("test", 0.0, 1.0, 2.0)
                .with_subcomponent("sub")
                .at(0.0)
        );
    }

    #[test]
    fn judge_is_inclusive() {
        assert_eq!(Verdict::judge(0.0, 0.0, 0.0), Verdict::Pass);
        assert_eq!(Verdict::judge(0.0, 2.0, 2.0), Verdict::Pass);
        assert_eq!(Verdict::judge(0.0, 3.0, 2.0), Verdict::Fail);
        assert_eq!(Verdict::judge(1.0, 0.0, 2.0), Verdict::Fail);
    }

    #[test]
    fn judge_handles_infinities_and_nan() {
        assert_eq!(
            Verdict::judge(f64::NEG_INFINITY, -1e300, f64::INFINITY),
            Verdict::Pass
        );
        assert_eq!(
            Verdict::judge(f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY),
            Verdict::Pass
        );
        assert_eq!(
            Verdict::judge(f64::NEG_INFINITY, f64::NAN, f64::INFINITY),
            Verdict::Fail
        );
    }

    #[test]
    fn record_conversions() {
        let record: Record = LogEvent::pass("c", 0.0, 1.0, 2.0).into();
        assert!(record.as_event().is_some());
        assert!(record.as_telemetry().is_none());

        let record: Record = Telemetry::at("d", 0.0).into();
        assert!(record.as_telemetry().is_some());
    }
}
