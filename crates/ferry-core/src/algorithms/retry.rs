//! Bounded retries with a fixed delay and a one-shot failure reporter.
//!
//! Built step by step so that every call site names its retry budget, its
//! delay, its reporter and a debug context:
//!
//! ```
//! use std::time::Duration;
//! use ferry_core::algorithms::RetryLogic;
//! use ferry_core::MigrationError;
//!
//! let retry = RetryLogic::max_retries(2)
//!     .retry_delay(Duration::ZERO)
//!     .exception_reporter(|e: &MigrationError, page: &u32| eprintln!("page {page}: {e}"))
//!     .debug_context("reading legacy stations");
//!
//! let value = retry.apply(&7, |page| Ok::<_, MigrationError>(page * 2)).unwrap();
//! assert_eq!(value, 14);
//! ```

use std::marker::PhantomData;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Placeholder context for call sites that do not supply one.
pub const NO_DEBUG_CONTEXT: &str = "(no debug context)";

/// A fully configured retry policy around operations taking `&A`.
pub struct RetryLogic<A: ?Sized, F> {
    max_retries: u32,
    retry_delay: Duration,
    reporter: F,
    context: String,
    _argument: PhantomData<fn(&A)>,
}

impl RetryLogic<(), ()> {
    /// Start building: allow at most `max` retries after the first attempt.
    pub fn max_retries(max: u32) -> RetryDelayStep {
        RetryDelayStep { max_retries: max }
    }
}

/// Second step: the delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryDelayStep {
    max_retries: u32,
}

impl RetryDelayStep {
    /// Sleep this long before each retry.
    pub fn retry_delay(self, delay: Duration) -> ReporterStep {
        ReporterStep {
            max_retries: self.max_retries,
            retry_delay: delay,
        }
    }
}

/// Third step: the callback fired once when the operation escalates.
#[derive(Debug, Clone, Copy)]
pub struct ReporterStep {
    max_retries: u32,
    retry_delay: Duration,
}

impl ReporterStep {
    /// Receives the last failure and the argument being processed.
    pub fn exception_reporter<A, F>(self, reporter: F) -> DebugContextStep<A, F>
    where
        A: ?Sized,
        F: Fn(&MigrationError, &A),
    {
        DebugContextStep {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            reporter,
            _argument: PhantomData,
        }
    }
}

/// Last step: the debug context carried by escalated failures.
pub struct DebugContextStep<A: ?Sized, F> {
    max_retries: u32,
    retry_delay: Duration,
    reporter: F,
    _argument: PhantomData<fn(&A)>,
}

impl<A: ?Sized, F: Fn(&MigrationError, &A)> DebugContextStep<A, F> {
    /// Tag escalated failures with the call site.
    pub fn debug_context(self, context: impl Into<String>) -> RetryLogic<A, F> {
        RetryLogic {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            reporter: self.reporter,
            context: context.into(),
            _argument: PhantomData,
        }
    }

    /// Use the fixed placeholder context.
    pub fn no_debug_context(self) -> RetryLogic<A, F> {
        self.debug_context(NO_DEBUG_CONTEXT)
    }
}

impl<A: ?Sized, F: Fn(&MigrationError, &A)> RetryLogic<A, F> {
    /// Retries allowed after the first attempt.
    pub fn retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.retry_delay
    }

    /// Debug context attached to escalations.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Run `operation` on `argument`, retrying transient failures.
    ///
    /// The operation runs at most `max_retries + 1` times. Non-transient
    /// failures are returned as-is after the first attempt; transient ones
    /// come back wrapped in [`MigrationError::RetriesExhausted`]. Either way the
    /// reporter fires exactly once.
    pub fn apply<T>(&self, argument: &A, mut operation: impl FnMut(&A) -> Result<T>) -> Result<T> {
        let mut retries_left = self.max_retries;
        loop {
            match operation(argument) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if let Some(escalated) = self.on_failure(error, argument, &mut retries_left) {
                        return Err(escalated);
                    }
                }
            }
        }
    }

    /// Like [`apply`](Self::apply) for operations that mutate their argument.
    pub fn apply_mut<T>(
        &self,
        argument: &mut A,
        mut operation: impl FnMut(&mut A) -> Result<T>,
    ) -> Result<T> {
        let mut retries_left = self.max_retries;
        loop {
            match operation(&mut *argument) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if let Some(escalated) = self.on_failure(error, &*argument, &mut retries_left) {
                        return Err(escalated);
                    }
                }
            }
        }
    }

    fn on_failure(
        &self,
        error: MigrationError,
        argument: &A,
        retries_left: &mut u32,
    ) -> Option<MigrationError> {
        if !error.is_transient() {
            (self.reporter)(&error, argument);
            return Some(error);
        }

        if *retries_left == 0 {
            (self.reporter)(&error, argument);
            tracing::warn!(
                context = %self.context,
                retries = self.max_retries,
                error = %error,
                "Retries exhausted"
            );
            return Some(MigrationError::RetriesExhausted {
                context: self.context.clone(),
                cause: Box::new(error),
            });
        }

        *retries_left -= 1;
        tracing::debug!(
            context = %self.context,
            retries_left = *retries_left,
            delay_ms = self.retry_delay.as_millis() as u64,
            error = %error,
            "Retrying after failure"
        );
        if !self.retry_delay.is_zero() {
            thread::sleep(self.retry_delay);
        }
        None
    }
}

/// What the engine does once a record failure has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Record the failure, then halt the migration and the rest of the plan.
    #[serde(rename = "STOP_IMMEDIATELY_AND_REPORT")]
    StopImmediately,
    /// Record the failure, finish the migration, then halt the plan.
    #[serde(rename = "FINISH_THE_MIGRATION_THEN_STOP_AND_REPORT")]
    FinishMigrationThenStop,
    /// Record the failure and carry on.
    #[default]
    #[serde(rename = "REPORT_AND_PROCEED")]
    ReportAndProceed,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionStrategy::StopImmediately => write!(f, "STOP_IMMEDIATELY_AND_REPORT"),
            ResolutionStrategy::FinishMigrationThenStop => {
                write!(f, "FINISH_THE_MIGRATION_THEN_STOP_AND_REPORT")
            }
            ResolutionStrategy::ReportAndProceed => write!(f, "REPORT_AND_PROCEED"),
        }
    }
}

/// Retry budget and failure strategy of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResolution {
    /// What happens after the failure is recorded.
    pub strategy: ResolutionStrategy,
    /// Retries after the first attempt.
    pub retry_times: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ErrorResolution {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::ReportAndProceed,
            retry_times: 1,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl ErrorResolution {
    /// Set the strategy.
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry budget.
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    /// Set the delay between attempts.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Retry logic preconfigured with this budget and delay.
    pub fn retry_logic(&self) -> ReporterStep {
        RetryLogic::max_retries(self.retry_times).retry_delay(self.retry_delay)
    }
}
