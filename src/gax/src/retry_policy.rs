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

//! Defines traits for retry policies and some common implementations.
//!
//! Callables automatically retry RPCs when they fail with an error whose
//! [Code] is configured as retryable for the method. The retry loop stops when
//! the policy reports the error as permanent, or when the policy is exhausted,
//! typically because the total timeout elapsed.
//!
//! Most applications configure retries through
//! [RetrySettings][crate::retry_settings::RetrySettings]. The traits and types
//! in this module are needed only to customize the classification.
//!
//! # Example
//! ```
//! # use gax::retry_policy::*;
//! # use gax::error::rpc::Code;
//! use std::time::Duration;
//! let policy = RetryableCodes::new([Code::Unavailable, Code::ResourceExhausted])
//!     .with_time_limit(Duration::from_secs(60))
//!     .with_attempt_limit(5);
//! ```

use crate::error::Error;
use crate::error::rpc::Code;
use crate::retry_result::RetryResult;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Determines how errors are handled in the retry loop.
///
/// Implementations of this trait determine if an error is retryable, and if
/// the retry loop should continue.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts. This includes the initial
    ///   attempt. This method is called after the first attempt, so the value
    ///   is always non-zero.
    /// * `error` - the last error when attempting the request.
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult;

    /// The remaining time in the retry policy.
    ///
    /// For policies based on time, this returns the remaining time in the
    /// policy. The retry loop uses this value to bound each attempt, and to
    /// give up before a backoff that would outlive the policy.
    ///
    /// For policies that are not time based this returns `None`.
    fn remaining_time(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> Option<Duration> {
        None
    }
}

/// A helper type to use [RetryPolicy] in builders and options.
#[derive(Clone, Debug)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T: RetryPolicy + 'static> std::convert::From<T> for RetryPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Extension trait for [RetryPolicy].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the total elapsed time in the retry
    /// loop.
    ///
    /// While the time spent in the retry loop (including time in backoff) is
    /// less than the prescribed duration the `on_error()` method returns the
    /// results of the inner policy. After that time it returns
    /// [Exhausted][RetryResult::Exhausted] if the inner policy returns
    /// [Continue][RetryResult::Continue].
    ///
    /// The `remaining_time()` function returns the remaining time. This is
    /// always [Duration::ZERO] once or after the policy's expiration time is
    /// reached.
    ///
    /// # Example
    /// ```
    /// # use gax::retry_policy::*;
    /// # use gax::error::{Error, rpc::{Code, Status}};
    /// use std::time::{Duration, Instant};
    /// let policy = RetryableCodes::new([Code::Unavailable]).with_time_limit(Duration::from_secs(10));
    /// let start = Instant::now() - Duration::from_secs(20);
    /// let error = Error::service(Status::default().set_code(Code::Unavailable));
    /// assert!(policy.on_error(start, 1, error).is_exhausted());
    /// ```
    fn with_time_limit(self, maximum_duration: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of retry attempts.
    ///
    /// While the number of attempts is less than the prescribed limit the
    /// `on_error()` method returns the results of the inner policy. After that
    /// limit it returns [Exhausted][RetryResult::Exhausted] if the inner
    /// policy returns [Continue][RetryResult::Continue].
    ///
    /// # Example
    /// ```
    /// # use gax::retry_policy::*;
    /// # use gax::error::Error;
    /// use std::time::Instant;
    /// let policy = AlwaysRetry.with_attempt_limit(3);
    /// assert!(policy.on_error(Instant::now(), 1, Error::io("transient")).is_continue());
    /// assert!(policy.on_error(Instant::now(), 3, Error::io("transient")).is_exhausted());
    /// ```
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, maximum_attempts)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// Retries errors whose [Code] is in a configured set.
///
/// This is the classification used by generated clients: each method has a
/// named set of retryable codes, typically `UNAVAILABLE` and sometimes
/// `DEADLINE_EXCEEDED` or `RESOURCE_EXHAUSTED`.
///
/// Cancellation is never retried, even if `CANCELLED` is in the set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryableCodes {
    codes: HashSet<Code>,
}

impl RetryableCodes {
    /// Creates a policy retrying the given codes.
    pub fn new<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = Code>,
    {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Returns true if `code` is retryable under this policy.
    pub fn contains(&self, code: Code) -> bool {
        self.codes.contains(&code)
    }

    /// The set of retryable codes.
    pub fn codes(&self) -> &HashSet<Code> {
        &self.codes
    }
}

impl RetryPolicy for RetryableCodes {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        if error.is_cancelled() || !self.codes.contains(&error.code()) {
            return RetryResult::Permanent(error);
        }
        RetryResult::Continue(error)
    }
}

/// A retry policy that retries all errors except cancellation.
///
/// This policy must be decorated to limit the number of retry attempts or the
/// duration of the retry loop.
#[derive(Clone, Debug)]
pub struct AlwaysRetry;

impl RetryPolicy for AlwaysRetry {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        if error.is_cancelled() {
            return RetryResult::Permanent(error);
        }
        RetryResult::Continue(error)
    }
}

/// A retry policy that never retries.
///
/// Calls configured without retry settings use this policy, they make exactly
/// one attempt.
#[derive(Clone, Debug)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        RetryResult::Permanent(error)
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
///
/// This policy decorates an inner policy and limits the duration of retry
/// loops. While the time spent in the retry loop (including time in backoff)
/// is less than the prescribed duration the `on_error()` method returns the
/// results of the inner policy. After that time it returns
/// [Exhausted][RetryResult::Exhausted] if the inner policy returns
/// [Continue][RetryResult::Continue].
///
/// Time is measured with the tokio clock, so the policy follows a paused clock
/// in tests.
#[derive(Debug)]
pub struct LimitedElapsedTime<P = RetryableCodes>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_duration: Duration,
}

impl LimitedElapsedTime {
    /// Creates a new instance retrying errors with the given codes.
    pub fn new<I>(codes: I, maximum_duration: Duration) -> Self
    where
        I: IntoIterator<Item = Code>,
    {
        Self {
            inner: RetryableCodes::new(codes),
            maximum_duration,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_duration: Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }

    fn deadline(&self, loop_start: std::time::Instant) -> std::time::Instant {
        loop_start + self.maximum_duration
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(loop_start, attempt_count, error) {
            RetryResult::Permanent(e) => RetryResult::Permanent(e),
            RetryResult::Exhausted(e) => RetryResult::Exhausted(e),
            RetryResult::Continue(e) => {
                if now() >= self.deadline(loop_start) {
                    RetryResult::Exhausted(e)
                } else {
                    RetryResult::Continue(e)
                }
            }
        }
    }

    fn remaining_time(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<Duration> {
        let deadline = self.deadline(loop_start);
        let remaining = deadline.saturating_duration_since(now());
        if let Some(inner) = self.inner.remaining_time(loop_start, attempt_count) {
            return Some(std::cmp::min(remaining, inner));
        }
        Some(remaining)
    }
}

/// A retry policy decorator that limits the number of attempts.
///
/// The policy passes through the results from the inner policy as long as
/// `attempt_count < maximum_attempts`. Once the maximum number of attempts is
/// reached, the policy replaces any [Continue][RetryResult::Continue] result
/// with [Exhausted][RetryResult::Exhausted].
#[derive(Debug)]
pub struct LimitedAttemptCount<P = RetryableCodes>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_attempts: u32,
}

impl LimitedAttemptCount {
    /// Creates a new instance retrying errors with the given codes.
    pub fn new<I>(codes: I, maximum_attempts: u32) -> Self
    where
        I: IntoIterator<Item = Code>,
    {
        Self {
            inner: RetryableCodes::new(codes),
            maximum_attempts,
        }
    }
}

impl<P> LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_attempts: u32) -> Self {
        Self {
            inner,
            maximum_attempts,
        }
    }
}

impl<P> RetryPolicy for LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(loop_start, attempt_count, error) {
            RetryResult::Continue(e) if attempt_count >= self.maximum_attempts => {
                RetryResult::Exhausted(e)
            }
            result => result,
        }
    }

    fn remaining_time(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<Duration> {
        self.inner.remaining_time(loop_start, attempt_count)
    }
}

// The tokio clock can be paused and advanced in tests, `std::time::Instant`
// cannot.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
