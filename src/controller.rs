//! Controller: runs a test procedure and schedules component checks.
//!
//! A test procedure is a lazy, finite sequence of scheduling [`Step`]s. The
//! [`Controller`] is its only driver: it asks the procedure for the next step, carries
//! the step out (wait, then optionally check every registered component), and only
//! then asks again. Nothing else preempts the procedure, and components are always
//! checked in registration order.
//!
//! # Architecture
//!
//! ```text
//! Controller::run
//!   ├─ Procedure::setup
//!   ├─ loop: Procedure::next_step → Step
//!   │        ├─ resolve wait (explicit, else controller default)
//!   │        ├─ Sleeper::sleep (skipped when the wait is zero)
//!   │        └─ CheckAndWait → Component::check for each component, in order
//!   ├─ Procedure::teardown   (always, even after an error)
//!   └─ return number of Fail events
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let mut controller = Controller::new().with_default_wait(Duration::from_millis(100));
//! controller.register_component(network.clone())?;
//!
//! let mut procedure = steps([Step::defaults(), Step::check_and_wait(Duration::from_secs(1))]);
//! let fails = controller.run(&mut procedure).await?;
//! ```

use crate::component::Component;
use crate::config::ControllerConfig;
use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a step does after its wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Wait, then do nothing else.
    Wait,
    /// Wait, then check every registered component.
    CheckAndWait,
}

/// Convert a wait given in seconds, rejecting negative and non-finite values.
pub fn wait_from_secs(secs: f64) -> HarnessResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| HarnessError::InvalidDuration(secs))
}

/// One scheduling action yielded by a procedure.
///
/// Both parts are optional; missing parts are filled in from the controller's
/// defaults. The wait is a ceiling: a zero wait does not touch the sleeper at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    kind: Option<ActionKind>,
    wait: Option<Duration>,
}

impl Step {
    /// Use the controller's default action and default wait.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Wait for `wait`, then do whatever the controller's default action does.
    pub fn after(wait: Duration) -> Self {
        Self {
            kind: None,
            wait: Some(wait),
        }
    }

    /// Like [`Step::after`], with the wait given in seconds.
    pub fn after_secs(secs: f64) -> HarnessResult<Self> {
        Ok(Self::after(wait_from_secs(secs)?))
    }

    /// Wait for `wait` and do nothing else.
    pub fn wait(wait: Duration) -> Self {
        Self {
            kind: Some(ActionKind::Wait),
            wait: Some(wait),
        }
    }

    /// Wait for `wait`, then check every component.
    pub fn check_and_wait(wait: Duration) -> Self {
        Self {
            kind: Some(ActionKind::CheckAndWait),
            wait: Some(wait),
        }
    }

    /// Check every component after the controller's default wait.
    pub fn check() -> Self {
        Self {
            kind: Some(ActionKind::CheckAndWait),
            wait: None,
        }
    }

    /// Explicit action, if any.
    pub fn kind(&self) -> Option<ActionKind> {
        self.kind
    }

    /// Explicit wait, if any.
    pub fn wait_duration(&self) -> Option<Duration> {
        self.wait
    }
}

impl From<Duration> for Step {
    fn from(wait: Duration) -> Self {
        Step::after(wait)
    }
}

/// The blocking primitive used for waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the Tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A resumable test procedure.
///
/// The controller calls `setup` once, then `next_step` until it returns `Ok(None)`,
/// then `teardown` exactly once, whatever happened before. A procedure is not
/// restartable: after returning `None` it is finished.
#[async_trait]
pub trait Procedure: Send {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "procedure"
    }

    /// Runs before the first step.
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Do whatever comes before the next suspension point and return the step to
    /// take there, or `None` when the procedure is complete.
    async fn next_step(&mut self) -> anyhow::Result<Option<Step>>;

    /// Runs after the last step, and also after any failure.
    async fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Components this procedure asserts through directly.
    ///
    /// Their fails count toward the run's total even when they are not registered
    /// with the controller. Registered components are counted once either way.
    fn components(&self) -> Vec<Arc<dyn Component>> {
        Vec::new()
    }
}

/// A procedure that only schedules: it yields the steps of an iterator in order.
pub struct Steps<I> {
    steps: I,
}

/// Build a [`Steps`] procedure.
pub fn steps<I>(steps: I) -> Steps<I::IntoIter>
where
    I: IntoIterator<Item = Step>,
{
    Steps {
        steps: steps.into_iter(),
    }
}

#[async_trait]
impl<I> Procedure for Steps<I>
where
    I: Iterator<Item = Step> + Send,
{
    fn name(&self) -> &str {
        "steps"
    }

    async fn next_step(&mut self) -> anyhow::Result<Option<Step>> {
        Ok(self.steps.next())
    }
}

/// Owns the component registry and runs procedures against it.
pub struct Controller {
    components: Vec<Arc<dyn Component>>,
    default_action: ActionKind,
    default_wait: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Empty registry; default action `CheckAndWait`, default wait zero.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            default_action: ActionKind::CheckAndWait,
            default_wait: Duration::ZERO,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Controller with defaults taken from configuration.
    pub fn from_config(config: &ControllerConfig) -> HarnessResult<Self> {
        Ok(Self::new()
            .with_default_action(config.default_action)
            .with_default_wait(config.default_wait()?))
    }

    /// Action applied to steps that do not name one.
    pub fn with_default_action(mut self, kind: ActionKind) -> Self {
        self.default_action = kind;
        self
    }

    /// Wait applied to steps that do not give one.
    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Replace the wait primitive.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Default action.
    pub fn default_action(&self) -> ActionKind {
        self.default_action
    }

    /// Default wait.
    pub fn default_wait(&self) -> Duration {
        self.default_wait
    }

    /// Add a component to the registry.
    ///
    /// Registering the same component again is a no-op. Registering a different
    /// component under a name that is already taken fails with
    /// [`HarnessError::DuplicateComponentName`] and leaves the registry unchanged.
    pub fn register_component(&mut self, component: Arc<dyn Component>) -> HarnessResult<()> {
        if let Some(existing) = self.component(component.name()) {
            if same_component(existing, &component) {
                debug!(component = component.name(), "component already registered");
                return Ok(());
            }
            return Err(HarnessError::DuplicateComponentName(
                component.name().to_string(),
            ));
        }

        debug!(component = component.name(), "component registered");
        self.components.push(component);
        Ok(())
    }

    /// Look up a registered component.
    pub fn component(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Registered component names, in registration order.
    pub fn components(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Run `procedure` through one full lifecycle and return the number of `Fail`
    /// events logged during setup, steps and teardown by registered components and
    /// by those the procedure lists in [`Procedure::components`].
    ///
    /// Teardown always runs. If the run failed, that error is returned (a teardown
    /// error after it is only logged); otherwise a teardown error is returned.
    pub async fn run<P>(&mut self, procedure: &mut P) -> HarnessResult<u64>
    where
        P: Procedure + ?Sized,
    {
        let tallied = self.tallied_components(procedure.components());
        let baseline = fail_total(&tallied);
        info!(
            procedure = procedure.name(),
            components = self.components.len(),
            "run started"
        );

        let outcome = self.drive(procedure).await;
        let teardown = procedure.teardown().await.map_err(HarnessError::Teardown);
        let fails = fail_total(&tallied).saturating_sub(baseline);

        match (outcome, teardown) {
            (Ok(steps), Ok(())) => {
                info!(procedure = procedure.name(), steps, fails, "run finished");
                Ok(fails)
            }
            (Ok(_), Err(e)) => {
                error!(procedure = procedure.name(), error = %e, "teardown failed");
                Err(e)
            }
            (Err(e), Ok(())) => {
                error!(procedure = procedure.name(), error = %e, "run aborted");
                Err(e)
            }
            (Err(e), Err(teardown_err)) => {
                error!(procedure = procedure.name(), error = %e, "run aborted");
                error!(
                    procedure = procedure.name(),
                    error = %teardown_err,
                    "teardown also failed"
                );
                Err(e)
            }
        }
    }

    async fn drive<P>(&self, procedure: &mut P) -> HarnessResult<usize>
    where
        P: Procedure + ?Sized,
    {
        procedure.setup().await.map_err(HarnessError::Setup)?;

        let mut index = 0;
        loop {
            let step = procedure
                .next_step()
                .await
                .map_err(|source| HarnessError::Step { index, source })?;
            let Some(step) = step else {
                return Ok(index);
            };
            self.execute(index, step).await?;
            index += 1;
        }
    }

    async fn execute(&self, index: usize, step: Step) -> HarnessResult<()> {
        let kind = step.kind().unwrap_or(self.default_action);
        let wait = step.wait_duration().unwrap_or(self.default_wait);
        debug!(index, ?kind, ?wait, "executing step");

        if !wait.is_zero() {
            self.sleeper.sleep(wait).await;
        }
        if kind == ActionKind::CheckAndWait {
            self.check_all().await?;
        }
        Ok(())
    }

    /// Call `check()` on every registered component, in registration order.
    ///
    /// Stops at the first component whose check fails.
    pub async fn check_all(&self) -> HarnessResult<()> {
        for component in &self.components {
            if let Err(source) = component.check().await {
                warn!(component = component.name(), error = %source, "check failed");
                return Err(HarnessError::Check {
                    component: component.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Registered components plus the procedure's own, without duplicates.
    fn tallied_components(&self, extra: Vec<Arc<dyn Component>>) -> Vec<Arc<dyn Component>> {
        let mut tallied = self.components.clone();
        for component in extra {
            if !tallied.iter().any(|c| same_component(c, &component)) {
                tallied.push(component);
            }
        }
        tallied
    }
}

fn fail_total(components: &[Arc<dyn Component>]) -> u64 {
    components.iter().map(|c| c.probe().fail_count()).sum()
}

/// Identity is the allocation, not the vtable.
fn same_component(a: &Arc<dyn Component>, b: &Arc<dyn Component>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
