//! Components and bound-checking assertions.
//!
//! A [`Component`] is a named, checkable facade over one piece of hardware under
//! test. It owns its driver, and on every [`Component::check`] reads it and judges
//! the reading with one of the assertion helpers. Judgments are logged, never raised:
//! an out-of-bounds value is a `Fail` event, not an error.
//!
//! The assertion helpers live on [`Probe`], which every component embeds. The probe
//! stamps each verdict with the component name and the current time, sends it to the
//! component's logger, and counts it so the controller can tally failures.
//!
//! # Example
//!
//! ```rust,ignore
//! struct SupplyRail<D> {
//!     probe: Probe,
//!     driver: D,
//! }
//!
//! #[async_trait]
//! impl<D: Driver<Reading = f64>> Component for SupplyRail<D> {
//!     fn probe(&self) -> &Probe {
//!         &self.probe
//!     }
//!
//!     async fn check(&self) -> anyhow::Result<()> {
//!         let volts = self.driver.read().await?;
//!         self.assert_between(4.75, volts, 5.25);
//!         Ok(())
//!     }
//! }
//! ```

use crate::event::{LogEvent, Verdict};
use crate::logging::SharedLogger;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stamps, logs and counts the verdicts of one component.
pub struct Probe {
    name: String,
    logger: SharedLogger,
    passes: AtomicU64,
    fails: AtomicU64,
}

impl Probe {
    /// Probe for the component called `name`, logging through `logger`.
    pub fn new(name: impl Into<String>, logger: SharedLogger) -> Self {
        Self {
            name: name.into(),
            logger,
            passes: AtomicU64::new(0),
            fails: AtomicU64::new(0),
        }
    }

    /// Component name stamped on every event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The logger events go to.
    pub fn logger(&self) -> &SharedLogger {
        &self.logger
    }

    /// Log `Pass` if `lower <= value <= upper`, else `Fail`.
    ///
    /// The three numbers are carried into the event verbatim, infinities included.
    pub fn assert_between(&self, lower: f64, value: f64, upper: f64) -> Verdict {
        let verdict = Verdict::judge(lower, value, upper);
        self.emit(LogEvent::new(verdict, self.name.as_str(), lower, value, upper))
    }

    /// Same as [`Probe::assert_between`], tagged with a subcomponent name.
    pub fn assert_subcomponent_between(
        &self,
        subcomponent: &str,
        lower: f64,
        value: f64,
        upper: f64,
    ) -> Verdict {
        let verdict = Verdict::judge(lower, value, upper);
        self.emit(
            LogEvent::new(verdict, self.name.as_str(), lower, value, upper)
                .with_subcomponent(subcomponent),
        )
    }

    /// `assert_between(-inf, value, upper)`
    pub fn assert_lt(&self, value: f64, upper: f64) -> Verdict {
        self.assert_between(f64::NEG_INFINITY, value, upper)
    }

    /// `assert_between(lower, value, inf)`
    pub fn assert_gt(&self, lower: f64, value: f64) -> Verdict {
        self.assert_between(lower, value, f64::INFINITY)
    }

    /// Number of `Pass` events emitted so far.
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Number of `Fail` events emitted so far.
    pub fn fail_count(&self) -> u64 {
        self.fails.load(Ordering::Relaxed)
    }

    fn emit(&self, event: LogEvent) -> Verdict {
        let verdict = event.verdict();
        match verdict {
            Verdict::Pass => self.passes.fetch_add(1, Ordering::Relaxed),
            Verdict::Fail => self.fails.fetch_add(1, Ordering::Relaxed),
        };
        self.logger.log(event.into());
        verdict
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("passes", &self.pass_count())
            .field("fails", &self.fail_count())
            .finish()
    }
}

/// A named, checkable facade over one piece of hardware under test.
///
/// # Contract
/// - `name()` is unique within a controller
/// - `check()` reads the driver and calls at least one assertion; it returns `Err`
///   only when the reading itself failed
/// - all methods take `&self`; per-component bookkeeping uses interior mutability
#[async_trait]
pub trait Component: Send + Sync {
    /// The embedded assertion helper.
    fn probe(&self) -> &Probe;

    /// Component name.
    fn name(&self) -> &str {
        self.probe().name()
    }

    /// Read the driver and judge the reading.
    async fn check(&self) -> anyhow::Result<()>;

    /// See [`Probe::assert_between`].
    fn assert_between(&self, lower: f64, value: f64, upper: f64) -> Verdict {
        self.probe().assert_between(lower, value, upper)
    }

    /// See [`Probe::assert_lt`].
    fn assert_lt(&self, value: f64, upper: f64) -> Verdict {
        self.probe().assert_lt(value, upper)
    }

    /// See [`Probe::assert_gt`].
    fn assert_gt(&self, lower: f64, value: f64) -> Verdict {
        self.probe().assert_gt(lower, value)
    }
}
