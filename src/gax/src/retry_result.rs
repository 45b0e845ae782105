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

//! The outcome of classifying a failed attempt.

use crate::error::Error;

/// The decision of a [RetryPolicy][crate::retry_policy::RetryPolicy] after a
/// failed attempt.
#[derive(Debug)]
pub enum RetryResult {
    /// The error is not retryable, stop the loop and return it.
    Permanent(Error),

    /// The error is retryable, but the policy allows no more attempts.
    Exhausted(Error),

    /// The error is retryable, the loop may try again after a backoff.
    Continue(Error),
}

impl RetryResult {
    /// Returns true if the result is [RetryResult::Permanent].
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns true if the result is [RetryResult::Exhausted].
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Returns true if the result is [RetryResult::Continue].
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }

    /// Consumes the result and returns the error it carries.
    pub fn into_error(self) -> Error {
        match self {
            Self::Permanent(e) | Self::Exhausted(e) | Self::Continue(e) => e,
        }
    }
}
