//! Fan-out sink.

use super::{Logger, SharedLogger};
use crate::error::HarnessResult;
use crate::event::Record;
use async_trait::async_trait;
use tracing::error;

/// Forwards every record to each of its sinks, in the order they were added.
#[derive(Default)]
pub struct FanoutLogger {
    sinks: Vec<SharedLogger>,
}

impl FanoutLogger {
    /// No sinks yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: SharedLogger) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Logger for FanoutLogger {
    fn log(&self, record: Record) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.log(record.clone());
            }
            last.log(record);
        }
    }

    /// Closes every sink, even if an earlier one fails. The first failure is returned.
    async fn close(&self) -> HarnessResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.close().await {
                error!(error = %e, "failed to close fan-out sink");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
