//! CSV file sink.
//!
//! Stands in for a time-series database: verdicts go to `events.csv`, telemetry goes
//! to one `telemetry_<device>.csv` per device. A telemetry table's header is taken
//! from the first sample of that device, so `device` and `timestamp` always lead.

use super::Logger;
use crate::error::{HarnessError, HarnessResult};
use crate::event::{LogEvent, Record};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const EVENT_HEADER: [&str; 7] = [
    "timestamp",
    "verdict",
    "component",
    "lower_bound",
    "value",
    "upper_bound",
    "subcomponent",
];

struct Tables {
    events: csv::Writer<File>,
    telemetry: HashMap<String, TelemetryTable>,
}

struct TelemetryTable {
    columns: Vec<String>,
    writer: csv::Writer<File>,
}

/// Writes events and telemetry as CSV tables in one directory.
pub struct CsvLogger {
    dir: PathBuf,
    tables: Mutex<Tables>,
}

impl CsvLogger {
    /// Create `dir` if needed and open `events.csv` in it, truncating old contents.
    pub fn create(dir: impl AsRef<Path>) -> HarnessResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut events = csv::Writer::from_path(dir.join("events.csv")).map_err(csv_error)?;
        events.write_record(EVENT_HEADER).map_err(csv_error)?;
        events.flush()?;

        info!(dir = %dir.display(), "CSV sink opened");
        Ok(Self {
            dir,
            tables: Mutex::new(Tables {
                events,
                telemetry: HashMap::new(),
            }),
        })
    }

    /// Directory the tables are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the telemetry table for `device`.
    pub fn telemetry_path(&self, device: &str) -> PathBuf {
        self.dir.join(format!("telemetry_{device}.csv"))
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_event(&self, event: &LogEvent) -> Result<(), csv::Error> {
        let mut tables = self.lock();
        tables.events.write_record([
            event.timestamp().to_string(),
            event.verdict().to_string(),
            event.component_name().to_string(),
            event.lower_bound().to_string(),
            event.value().to_string(),
            event.upper_bound().to_string(),
            event.subcomponent_name().unwrap_or_default().to_string(),
        ])?;
        // Events are flushed per write, telemetry only on close.
        tables.events.flush()?;
        Ok(())
    }

    fn write_telemetry(&self, sample: &Telemetry) -> Result<(), csv::Error> {
        let mut tables = self.lock();
        if !tables.telemetry.contains_key(sample.device()) {
            let columns: Vec<String> = sample
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let mut writer = csv::Writer::from_path(self.telemetry_path(sample.device()))?;
            writer.write_record(&columns)?;
            tables
                .telemetry
                .insert(sample.device().to_string(), TelemetryTable { columns, writer });
        }

        let Some(table) = tables.telemetry.get_mut(sample.device()) else {
            return Ok(());
        };
        let names = sample.column_names();
        if names.len() != table.columns.len() || names.iter().zip(&table.columns).any(|(a, b)| a != b) {
            warn!(
                device = sample.device(),
                "telemetry columns differ from the table header, sample dropped"
            );
            return Ok(());
        }
        table.writer.write_record(sample.column_values())
    }

    fn flush_all(&self) -> std::io::Result<()> {
        let mut tables = self.lock();
        tables.events.flush()?;
        for table in tables.telemetry.values_mut() {
            table.writer.flush()?;
        }
        Ok(())
    }
}

fn csv_error(err: csv::Error) -> HarnessError {
    HarnessError::Io(std::io::Error::other(err))
}

#[async_trait]
impl Logger for CsvLogger {
    fn log(&self, record: Record) {
        let result = match &record {
            Record::Event(e) => self.write_event(e),
            Record::Telemetry(t) => self.write_telemetry(t),
        };
        if let Err(e) = result {
            warn!(error = %e, dir = %self.dir.display(), "CSV sink write failed");
        }
    }

    async fn close(&self) -> HarnessResult<()> {
        self.flush_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn writes_events_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CsvLogger::create(dir.path()).unwrap();

        logger.log(LogEvent::fail("test", 0.0, 1.0, 2.0).at(0.0).into());
        logger.log(
            LogEvent::pass("test", f64::NEG_INFINITY, 1.0, 2.0)
                .with_subcomponent("sub")
                .at(1.0)
                .into(),
        );
        logger.close().await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "timestamp,verdict,component,lower_bound,value,upper_bound,subcomponent",
                "0,FAIL,test,0,1,2,",
                "1,PASS,test,-inf,1,2,sub",
            ]
        );
    }

    #[tokio::test]
    async fn telemetry_header_leads_with_base_columns() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CsvLogger::create(dir.path()).unwrap();

        for i in 0..3 {
            logger.log(
                Telemetry::at("counter", i as f64)
                    .with_field("incremental_units", 1.0)
                    .with_field("cumulative_units", (i + 1) as f64)
                    .into(),
            );
        }
        logger.log(Telemetry::at("network", 0.0).with_field("bytes", 5.0).into());
        logger.close().await.unwrap();

        let mut reader = csv::Reader::from_path(logger.telemetry_path("counter")).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            header,
            vec!["device", "timestamp", "incremental_units", "cumulative_units"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][3], "3");

        assert!(logger.telemetry_path("network").exists());
    }

    #[tokio::test]
    #[traced_test]
    async fn mismatched_telemetry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CsvLogger::create(dir.path()).unwrap();

        logger.log(Telemetry::at("counter", 0.0).with_field("units", 1.0).into());
        logger.log(
            Telemetry::at("counter", 1.0)
                .with_field("units", 2.0)
                .with_field("extra", 3.0)
                .into(),
        );
        logger.log(Telemetry::at("counter", 2.0).with_field("volts", 4.0).into());
        logger.log(Telemetry::at("counter", 3.0).with_field("units", 5.0).into());
        logger.close().await.unwrap();

        let text = std::fs::read_to_string(logger.telemetry_path("counter")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["device,timestamp,units", "counter,0,1", "counter,3,5"]);
        assert!(logs_contain("sample dropped"));
    }
}
