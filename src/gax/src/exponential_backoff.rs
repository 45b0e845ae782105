// Copyright 2024 Google LLC
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

//! Truncated [exponential backoff].
//!
//! The delay sequence starts at the initial delay and grows by the scaling
//! factor after every attempt until it reaches the maximum delay:
//!
//! ```text
//! d(1) = initial
//! d(n+1) = min(d(n) * scaling, maximum)
//! ```
//!
//! The sequence is deterministic unless jitter is enabled with
//! [ExponentialBackoffBuilder::with_jitter]. With jitter, each delay is drawn
//! uniformly from `[0, d(n)]`.
//!
//! It implements the [BackoffPolicy] and [PollingBackoffPolicy] traits.
//!
//! [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
//! [BackoffPolicy]: crate::backoff_policy::BackoffPolicy
//! [PollingBackoffPolicy]: crate::polling_backoff_policy::PollingBackoffPolicy

use std::time::Duration;

/// The error type for exponential backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the scaling value ({0}) should be a finite number >= 1.0")]
    InvalidScalingFactor(f64),
    #[error("the initial delay ({0:?}) should be greater than zero")]
    InvalidInitialDelay(Duration),
    #[error(
        "the maximum delay ({maximum:?}) should be greater than or equal to the initial delay ({initial:?})"
    )]
    EmptyRange {
        maximum: Duration,
        initial: Duration,
    },
}

/// Builds [ExponentialBackoff] policies.
///
/// # Example
/// ```
/// # use gax::exponential_backoff::*;
/// use std::time::Duration;
/// let policy = ExponentialBackoffBuilder::new()
///     .with_initial_delay(Duration::from_millis(100))
///     .with_maximum_delay(Duration::from_secs(5))
///     .with_scaling(4.0)
///     .build()?;
/// assert_eq!(policy.delay(1), Duration::from_millis(100));
/// # Ok::<(), Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
    jitter: bool,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters.
    ///
    /// The initial delay is 1 second, the maximum delay is 60 seconds, and the
    /// scaling factor is 2.0. Jitter is disabled.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
            jitter: false,
        }
    }

    /// Change the initial delay.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    /// Change the maximum delay.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_delay = v.into();
        self
    }

    /// Change the scaling factor in this backoff policy.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.scaling = v.into();
        self
    }

    /// Enables or disables full jitter.
    ///
    /// Randomized delays avoid synchronized retries from many clients after a
    /// shared failure. Disabled by default, so the sequence can be asserted
    /// exactly.
    pub fn with_jitter(mut self, v: bool) -> Self {
        self.jitter = v;
        self
    }

    /// Creates a new exponential backoff policy, validating the parameters.
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        if !(self.scaling >= 1.0 && self.scaling.is_finite()) {
            return Err(Error::InvalidScalingFactor(self.scaling));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidInitialDelay(self.initial_delay));
        }
        if self.maximum_delay < self.initial_delay {
            return Err(Error::EmptyRange {
                maximum: self.maximum_delay,
                initial: self.initial_delay,
            });
        }
        Ok(ExponentialBackoff {
            initial_delay: self.initial_delay,
            maximum_delay: self.maximum_delay,
            scaling: self.scaling,
            jitter: self.jitter,
        })
    }

    /// Creates a new exponential backoff policy, clamping the parameters into
    /// a valid range.
    ///
    /// The scaling factor is clamped to `[1.0, 32.0]`, the maximum delay to
    /// `[1ms, 24h]`, and the initial delay to `[1ms, maximum delay]`. A NaN
    /// scaling factor becomes 1.0.
    pub fn clamp(self) -> ExponentialBackoff {
        let scaling = if self.scaling.is_nan() {
            1.0
        } else {
            self.scaling.clamp(1.0, 32.0)
        };
        let maximum_delay = self
            .maximum_delay
            .clamp(Duration::from_millis(1), Duration::from_secs(24 * 60 * 60));
        let initial_delay = self
            .initial_delay
            .clamp(Duration::from_millis(1), maximum_delay);
        ExponentialBackoff {
            initial_delay,
            maximum_delay,
            scaling,
            jitter: self.jitter,
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements truncated exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    /// The delay before the attempt following attempt number `attempt_count`.
    ///
    /// This never includes jitter. The first delay, after the first attempt,
    /// is the initial delay.
    pub fn delay(&self, attempt_count: u32) -> Duration {
        let exp = std::cmp::min(i32::MAX as u32, attempt_count) as i32;
        let exp = exp.saturating_sub(1);
        let scaling = self.scaling.powi(exp);
        if scaling >= self.maximum_delay.div_duration_f64(self.initial_delay) {
            self.maximum_delay
        } else {
            // `scaling >= 1.0` and `initial_delay * scaling < maximum_delay`
            // so `mul_f64()` cannot overflow.
            self.initial_delay.mul_f64(scaling)
        }
    }

    /// Computes the delay that follows `previous`.
    ///
    /// # Example
    /// ```
    /// # use gax::exponential_backoff::*;
    /// use std::time::Duration;
    /// let policy = ExponentialBackoffBuilder::new()
    ///     .with_initial_delay(Duration::from_secs(1))
    ///     .with_maximum_delay(Duration::from_secs(3))
    ///     .build()?;
    /// assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
    /// assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(3));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let ratio = self
            .maximum_delay
            .div_duration_f64(previous.max(Duration::from_nanos(1)));
        if self.scaling >= ratio {
            self.maximum_delay
        } else {
            previous.mul_f64(self.scaling).min(self.maximum_delay)
        }
    }

    /// An unbounded iterator over the delay sequence, without jitter.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay), |d| Some(self.next_delay(*d)))
    }

    /// The initial delay.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// The maximum delay.
    pub fn maximum_delay(&self) -> Duration {
        self.maximum_delay
    }

    /// The scaling factor.
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    fn delay_with_jitter(&self, attempt_count: u32, rng: &mut impl rand::Rng) -> Duration {
        let delay = self.delay(attempt_count);
        rng.random_range(Duration::ZERO..=delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoffBuilder::new().clamp()
    }
}

impl crate::polling_backoff_policy::PollingBackoffPolicy for ExponentialBackoff {
    fn wait_period(&self, _loop_start: std::time::Instant, attempt_count: u32) -> Duration {
        self.delay(attempt_count)
    }
}

impl crate::backoff_policy::BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, _loop_start: std::time::Instant, attempt_count: u32) -> Duration {
        if self.jitter {
            self.delay_with_jitter(attempt_count, &mut rand::rng())
        } else {
            self.delay(attempt_count)
        }
    }
}
