//! Synchronous console sink.
//!
//! Events render as
//! `<timestamp>,<PASS|FAIL>,<component>,<lower>,<value>,<upper>[,<subcomponent>]`,
//! telemetry as `<timestamp>,TELEMETRY,<device>,<name>=<value>,...`. Infinite bounds
//! print as `inf` / `-inf`. Names must not contain commas; no escaping is done.

use super::Logger;
use crate::event::{LogEvent, Record};
use crate::telemetry::Telemetry;
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::warn;

/// Writes one line per record, immediately.
pub struct ConsoleLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleLogger {
    /// Log to standard output.
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Log to standard error. Worker processes use this because their stdout carries
    /// binary records.
    pub fn stderr() -> Self {
        Self::with_writer(io::stderr())
    }

    /// Log to an arbitrary writer.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

/// Render an event as a console line (without the trailing newline).
pub fn format_event(event: &LogEvent) -> String {
    let mut line = format!(
        "{},{},{},{},{},{}",
        event.timestamp(),
        event.verdict(),
        event.component_name(),
        event.lower_bound(),
        event.value(),
        event.upper_bound()
    );
    if let Some(sub) = event.subcomponent_name() {
        line.push(',');
        line.push_str(sub);
    }
    line
}

/// Render a telemetry sample as a console line (without the trailing newline).
pub fn format_telemetry(sample: &Telemetry) -> String {
    let mut line = format!("{},TELEMETRY,{}", sample.timestamp(), sample.device());
    for (name, value) in sample.fields() {
        line.push_str(&format!(",{name}={value}"));
    }
    line
}

/// Render any record.
pub fn format_record(record: &Record) -> String {
    match record {
        Record::Event(e) => format_event(e),
        Record::Telemetry(t) => format_telemetry(t),
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, record: Record) {
        let line = format_record(&record);
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %e, "console sink write failed");
        }
    }
}
