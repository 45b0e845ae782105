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

use gax::options::CallOptions;
use gax::polling_backoff_policy::{
    PollingBackoffPolicy, PollingBackoffPolicyArg, default_polling_backoff,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Controls how [Operation::wait_until_done][crate::Operation::wait_until_done]
/// polls.
///
/// By default the first poll happens after 10 seconds, and the delay grows by
/// a factor of 1.3 up to 5 minutes. The wait gives up after one hour.
#[derive(Clone, Debug)]
pub struct WaitOptions {
    backoff: Arc<dyn PollingBackoffPolicy>,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
    call_options: CallOptions,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schedule of delays between polls.
    pub fn set_backoff<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff = v.into().into_inner();
        self
    }

    /// Sets how long to wait for the operation to complete.
    pub fn set_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.timeout = v.into();
        self
    }

    /// Stops waiting when `v` is cancelled.
    pub fn set_cancellation(mut self, v: CancellationToken) -> Self {
        self.cancellation = Some(v);
        self
    }

    /// Sets the options for each polling RPC.
    pub fn set_call_options(mut self, v: CallOptions) -> Self {
        self.call_options = v;
        self
    }

    pub fn backoff(&self) -> &Arc<dyn PollingBackoffPolicy> {
        &self.backoff
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn call_options(&self) -> &CallOptions {
        &self.call_options
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            backoff: Arc::new(default_polling_backoff()),
            timeout: Duration::from_secs(3600),
            cancellation: None,
            call_options: CallOptions::new(),
        }
    }
}
