//! Record sinks.
//!
//! Every sink implements [`Logger`]: `log()` accepts a [`Record`] and returns without
//! telling the caller whether persistence succeeded. Failures inside a sink are the
//! sink's concern and are reported through `tracing` diagnostics.
//!
//! # Available Sinks
//!
//! - [`NullLogger`] - discards everything
//! - [`ConsoleLogger`] - one comma-joined line per record, written immediately
//! - [`CsvLogger`] - events and per-device telemetry tables on disk (`storage_csv`)
//! - [`MemoryLogger`] - keeps records in memory for inspection
//! - [`FanoutLogger`] - forwards each record to several sinks
//! - [`AsyncLogger`] - queues records for a background worker that feeds a delegate
//!
//! Loggers are shared between components as [`SharedLogger`], so `log()` must be safe
//! to call from several tasks at once. Synchronous sinks serialize internally.

pub mod async_logger;
pub mod console;
#[cfg(feature = "storage_csv")]
pub mod csv_file;
pub mod fanout;
pub mod memory;

pub use async_logger::AsyncLogger;
pub use console::ConsoleLogger;
#[cfg(feature = "storage_csv")]
pub use csv_file::CsvLogger;
pub use fanout::FanoutLogger;
pub use memory::MemoryLogger;

use crate::config::{LoggingConfig, SinkKind};
use crate::error::{HarnessError, HarnessResult};
use crate::event::Record;
use async_trait::async_trait;
use std::sync::Arc;

/// A sink for log events and telemetry.
///
/// # Contract
/// - `log` never blocks on persistence and never returns an error
/// - `close` flushes or drains whatever the sink buffers; stateless sinks keep the
///   default no-op
/// - implementations are `Send + Sync` and may be called concurrently
#[async_trait]
pub trait Logger: Send + Sync {
    /// Record one event or sample.
    fn log(&self, record: Record);

    /// Release background work and flush buffered output.
    async fn close(&self) -> HarnessResult<()> {
        Ok(())
    }
}

/// Logger handle shared between components, drivers and the controller.
pub type SharedLogger = Arc<dyn Logger>;

/// Discards everything. Used when logging is not wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _record: Record) {}
}

/// A shared [`NullLogger`].
pub fn null() -> SharedLogger {
    Arc::new(NullLogger)
}

/// Build the sink described by `config`.
///
/// When `config.asynchronous` is set the sink is wrapped in an [`AsyncLogger`]; that
/// fails with a configuration error outside a Tokio runtime.
pub fn logger_from_config(config: &LoggingConfig) -> HarnessResult<SharedLogger> {
    if config.asynchronous && tokio::runtime::Handle::try_current().is_err() {
        return Err(HarnessError::Configuration(
            "asynchronous logging requires a Tokio runtime".to_string(),
        ));
    }

    let sink: SharedLogger = match config.sink {
        SinkKind::Null => return Ok(null()),
        SinkKind::Console => Arc::new(ConsoleLogger::stdout()),
        SinkKind::Csv => csv_sink(config)?,
    };

    if config.asynchronous {
        Ok(Arc::new(AsyncLogger::spawn(sink)))
    } else {
        Ok(sink)
    }
}

#[cfg(feature = "storage_csv")]
fn csv_sink(config: &LoggingConfig) -> HarnessResult<SharedLogger> {
    Ok(Arc::new(CsvLogger::create(&config.csv_dir)?))
}

#[cfg(not(feature = "storage_csv"))]
fn csv_sink(_config: &LoggingConfig) -> HarnessResult<SharedLogger> {
    Err(HarnessError::Configuration(
        "CSV sink requires the 'storage_csv' feature".to_string(),
    ))
}
