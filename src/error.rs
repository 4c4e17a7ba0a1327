//! Custom error types for the harness.
//!
//! This module defines the primary error type, `HarnessError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the ways a test run can go wrong, from configuration issues to a background worker
//! that stopped talking to us.
//!
//! ## Error Hierarchy
//!
//! - **`DuplicateComponentName`**: two distinct components were registered under one
//!   name. Raised at registration time, never deferred to the run.
//! - **`Setup` / `Step` / `Check` / `Teardown`**: failures raised by the test procedure
//!   or a component while a run is in progress. They wrap the `anyhow::Error` produced
//!   at the device seam.
//! - **`Worker*`**: problems with a background driver's worker process.
//! - **`Config` / `Configuration`**: parse errors from `figment` and semantic errors
//!   caught by validation.
//!
//! Note that an out-of-bounds measurement is *not* an error: it is a logged `Fail`.

use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum HarnessError {
    #[error("A different component named '{0}' is already registered")]
    DuplicateComponentName(String),

    #[error("Procedure setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    #[error("Procedure step {index} failed: {source}")]
    Step {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Check of component '{component}' failed: {source}")]
    Check {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Procedure teardown failed: {0}")]
    Teardown(#[source] anyhow::Error),

    #[error("Invalid wait duration {0} s (must be finite and non-negative)")]
    InvalidDuration(f64),

    #[error("Record frame has {actual} bytes, expected {expected}")]
    RecordLength { expected: usize, actual: usize },

    #[error("Failed to spawn background worker '{program}': {source}")]
    WorkerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background worker sent no record within {0:?}")]
    WorkerUnresponsive(std::time::Duration),

    #[error("Background worker exited")]
    WorkerExited,

    #[error("Background worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl HarnessError {
    /// Whether the error was raised before any procedure code ran.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::DuplicateComponentName(_)
                | HarnessError::InvalidDuration(_)
                | HarnessError::Config(_)
                | HarnessError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        HarnessError::WorkerProtocol(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_message_names_component() {
        let err = HarnessError::DuplicateComponentName("network".into());
        assert!(err.to_string().contains("'network'"));
        assert!(err.is_configuration());
    }

    #[test]
    fn check_error_keeps_source() {
        let err = HarnessError::Check {
            component: "counter".into(),
            source: anyhow::anyhow!("sensor offline"),
        };
        let msg = err.to_string();
        assert!(msg.contains("counter"));
        assert!(msg.contains("sensor offline"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn json_errors_become_protocol_errors() {
        let parse = serde_json::from_str::<u32>("nope").unwrap_err();
        match HarnessError::from(parse) {
            HarnessError::WorkerProtocol(msg) => assert!(!msg.is_empty()),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
