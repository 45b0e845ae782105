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

//! Defines the trait for polling backoff policies.
//!
//! Long-running operations are polled until they complete. The polling loop
//! waits between queries to avoid overloading the service, and the wait
//! usually grows as the operation takes longer.
//!
//! The default policy for long-running operations starts at 10 seconds and
//! grows by a factor of 1.3 up to 5 minutes.

use crate::exponential_backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;

/// Computes the wait between two queries of a polling loop.
pub trait PollingBackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the wait period after the `attempt_count`-th query.
    ///
    /// # Parameters
    /// * `loop_start` - when the polling loop started.
    /// * `attempt_count` - the number of poll queries. This method is always
    ///   called after the first query.
    fn wait_period(&self, loop_start: std::time::Instant, attempt_count: u32) -> Duration;
}

/// A helper type to use [PollingBackoffPolicy] in builders and options.
#[derive(Clone, Debug)]
pub struct PollingBackoffPolicyArg(pub(crate) Arc<dyn PollingBackoffPolicy>);

impl PollingBackoffPolicyArg {
    /// Returns the wrapped policy.
    pub fn into_inner(self) -> Arc<dyn PollingBackoffPolicy> {
        self.0
    }
}

impl<T: PollingBackoffPolicy + 'static> std::convert::From<T> for PollingBackoffPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn PollingBackoffPolicy>> for PollingBackoffPolicyArg {
    fn from(value: Arc<dyn PollingBackoffPolicy>) -> Self {
        Self(value)
    }
}

/// Always waits the same amount of time between queries.
#[derive(Clone, Debug)]
pub struct FixedInterval(pub Duration);

impl PollingBackoffPolicy for FixedInterval {
    fn wait_period(&self, _loop_start: std::time::Instant, _attempt_count: u32) -> Duration {
        self.0
    }
}

/// The polling backoff used for long-running operations unless the
/// application configures a different one.
pub fn default_polling_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_delay(Duration::from_secs(10))
        .with_maximum_delay(Duration::from_secs(300))
        .with_scaling(1.3)
        .clamp()
}
