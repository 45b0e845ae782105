// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-method retry configuration.
//!
//! Generated clients describe the retry behavior of each method with a set of
//! retryable codes, an exponential backoff schedule, and a total timeout. The
//! [RetrySettings] type holds these values. At call time they are turned into
//! a [RetryPolicy] and a [BackoffPolicy] for the retry loop.

use crate::backoff_policy::BackoffPolicy;
use crate::error::rpc::Code;
use crate::exponential_backoff::{Error, ExponentialBackoff, ExponentialBackoffBuilder};
use crate::retry_policy::{RetryPolicy, RetryPolicyExt, RetryableCodes};
use std::sync::Arc;
use std::time::Duration;

/// The retry configuration for a method.
///
/// # Example
/// ```
/// # use gax::retry_settings::RetrySettings;
/// # use gax::error::rpc::Code;
/// use std::time::Duration;
/// let settings = RetrySettings::builder()
///     .with_retryable_codes([Code::Unavailable])
///     .with_initial_delay(Duration::from_millis(100))
///     .with_delay_multiplier(1.3)
///     .with_max_delay(Duration::from_secs(60))
///     .with_total_timeout(Duration::from_secs(600))
///     .build()?;
/// assert!(settings.retryable_codes().contains(Code::Unavailable));
/// # Ok::<(), gax::exponential_backoff::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    retryable_codes: RetryableCodes,
    backoff: ExponentialBackoff,
    total_timeout: Duration,
}

impl RetrySettings {
    /// Creates settings from already validated components.
    pub fn new(
        retryable_codes: RetryableCodes,
        backoff: ExponentialBackoff,
        total_timeout: Duration,
    ) -> Self {
        Self {
            retryable_codes,
            backoff,
            total_timeout,
        }
    }

    /// Returns a builder for [RetrySettings].
    pub fn builder() -> RetrySettingsBuilder {
        RetrySettingsBuilder::default()
    }

    /// The codes considered transient for this method.
    pub fn retryable_codes(&self) -> &RetryableCodes {
        &self.retryable_codes
    }

    /// The backoff schedule between attempts.
    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// The maximum time spent in the retry loop, including backoff.
    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// The retry policy for these settings.
    ///
    /// Retries the configured codes until the total timeout elapses.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        Arc::new(
            self.retryable_codes
                .clone()
                .with_time_limit(self.total_timeout),
        )
    }

    /// The backoff policy for these settings.
    pub fn backoff_policy(&self) -> Arc<dyn BackoffPolicy> {
        Arc::new(self.backoff.clone())
    }
}

/// Builds [RetrySettings], validating the backoff parameters.
#[derive(Clone, Debug)]
pub struct RetrySettingsBuilder {
    retryable_codes: Vec<Code>,
    backoff: ExponentialBackoffBuilder,
    total_timeout: Duration,
}

impl Default for RetrySettingsBuilder {
    fn default() -> Self {
        Self {
            retryable_codes: vec![Code::Unavailable],
            backoff: ExponentialBackoffBuilder::new(),
            total_timeout: Duration::from_secs(600),
        }
    }
}

impl RetrySettingsBuilder {
    /// Replaces the set of retryable codes.
    pub fn with_retryable_codes<I>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = Code>,
    {
        self.retryable_codes = v.into_iter().collect();
        self
    }

    /// Sets the first backoff delay.
    pub fn with_initial_delay(mut self, v: Duration) -> Self {
        self.backoff = self.backoff.with_initial_delay(v);
        self
    }

    /// Sets the factor applied to the delay after each attempt.
    pub fn with_delay_multiplier(mut self, v: f64) -> Self {
        self.backoff = self.backoff.with_scaling(v);
        self
    }

    /// Sets the maximum backoff delay.
    pub fn with_max_delay(mut self, v: Duration) -> Self {
        self.backoff = self.backoff.with_maximum_delay(v);
        self
    }

    /// Enables full jitter on the backoff delays.
    pub fn with_jitter(mut self, v: bool) -> Self {
        self.backoff = self.backoff.with_jitter(v);
        self
    }

    /// Sets the total timeout.
    pub fn with_total_timeout(mut self, v: Duration) -> Self {
        self.total_timeout = v;
        self
    }

    /// Validates the parameters and creates the settings.
    ///
    /// Fails if `delay_multiplier` is not a finite number `>= 1`, if the
    /// initial delay is zero, or if the initial delay exceeds the maximum
    /// delay.
    pub fn build(self) -> Result<RetrySettings, Error> {
        Ok(RetrySettings {
            retryable_codes: RetryableCodes::new(self.retryable_codes),
            backoff: self.backoff.build()?,
            total_timeout: self.total_timeout,
        })
    }
}
