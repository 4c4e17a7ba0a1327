//! Simulated pulse counter.
//!
//! A stand-in for a hardware counter: `write(Pulse { count })` queues pulses, and
//! each `read()` reports how many arrived since the previous read plus the running
//! total. Useful for exercising the controller and the background bridge without any
//! real hardware attached.

use crate::component::{Component, Probe};
use crate::driver::{Driver, FixedRecord};
use crate::logging::SharedLogger;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

crate::fixed_record! {
    /// One counter reading.
    pub struct CounterReading {
        /// Pulses since the previous read.
        pub incremental_units: i32,
        /// Pulses since the driver started or was reset.
        pub cumulative_units: i32,
    }
}

/// Commands accepted by [`CounterDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterCommand {
    /// Register `count` pulses.
    Pulse {
        /// Number of pulses, at least zero.
        count: i32,
    },
    /// Zero both counts.
    Reset,
}

#[derive(Debug, Default)]
struct CounterState {
    pending: i32,
    cumulative: i32,
}

/// In-process simulated counter.
#[derive(Default)]
pub struct CounterDriver {
    state: Mutex<CounterState>,
    telemetry: Option<SharedLogger>,
}

impl CounterDriver {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log every reading as `counter` telemetry.
    pub fn with_telemetry(mut self, logger: SharedLogger) -> Self {
        self.telemetry = Some(logger);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CounterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Driver for CounterDriver {
    type Reading = CounterReading;
    type Command = CounterCommand;

    async fn read(&self) -> Result<CounterReading> {
        let reading = {
            let mut state = self.state();
            let incremental = std::mem::take(&mut state.pending);
            state.cumulative = state.cumulative.saturating_add(incremental);
            CounterReading {
                incremental_units: incremental,
                cumulative_units: state.cumulative,
            }
        };

        if let Some(logger) = &self.telemetry {
            logger.log(reading.to_telemetry("counter").into());
        }
        Ok(reading)
    }

    async fn write(&self, command: CounterCommand) -> Result<()> {
        let mut state = self.state();
        match command {
            CounterCommand::Pulse { count } if count < 0 => {
                bail!("pulse count must be non-negative, got {count}")
            }
            CounterCommand::Pulse { count } => {
                state.pending = state.pending.saturating_add(count);
            }
            CounterCommand::Reset => *state = CounterState::default(),
        }
        Ok(())
    }
}

/// Component checking that the counter moves only when stimulated.
///
/// After [`Counter::pulse`] the next check expects at least one new unit; otherwise it
/// expects none. New units are measured from the cumulative count, so a background
/// driver that polls many times between checks is judged the same as a direct one.
pub struct Counter<D> {
    probe: Probe,
    driver: D,
    expect_units: AtomicBool,
    last_cumulative: AtomicI32,
}

impl<D> Counter<D>
where
    D: Driver<Reading = CounterReading, Command = CounterCommand>,
{
    /// Component named `counter`.
    pub fn new(driver: D, logger: SharedLogger) -> Self {
        Self::named("counter", driver, logger)
    }

    /// Component with a custom name.
    pub fn named(name: impl Into<String>, driver: D, logger: SharedLogger) -> Self {
        Self {
            probe: Probe::new(name, logger),
            driver,
            expect_units: AtomicBool::new(false),
            last_cumulative: AtomicI32::new(0),
        }
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Send `count` pulses and expect them at the next check.
    pub async fn pulse(&self, count: i32) -> Result<()> {
        self.driver.write(CounterCommand::Pulse { count }).await?;
        self.expect_units.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl<D> Component for Counter<D>
where
    D: Driver<Reading = CounterReading, Command = CounterCommand>,
{
    fn probe(&self) -> &Probe {
        &self.probe
    }

    async fn check(&self) -> Result<()> {
        let reading = self.driver.read().await?;
        let previous = self
            .last_cumulative
            .swap(reading.cumulative_units, Ordering::SeqCst);
        let new_units = f64::from(reading.cumulative_units.saturating_sub(previous));

        if self.expect_units.swap(false, Ordering::SeqCst) {
            self.assert_gt(1.0, new_units);
        } else {
            self.assert_between(0.0, new_units, 0.0);
        }
        Ok(())
    }
}
