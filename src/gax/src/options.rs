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

//! Per-call options and their defaults.
//!
//! The same [CallOptions] type describes three scopes of configuration: the
//! service defaults, the per-method defaults, and the options provided by the
//! application for a single call. The scopes are combined with
//! [CallOptions::merge], where the more specific scope always wins and absent
//! fields inherit from the less specific scope.
//!
//! # Example
//! ```
//! # use gax::options::CallOptions;
//! use std::time::Duration;
//! let service = CallOptions::new()
//!     .set_timeout(Duration::from_secs(60))
//!     .insert_metadata("x-goog-api-client", "gl-rust/1.85");
//! let method = CallOptions::new().set_timeout(Duration::from_secs(30));
//! let call = CallOptions::new().insert_metadata("x-goog-request-params", "name=a");
//!
//! let effective = call.merge(&method.merge(&service));
//! assert_eq!(effective.timeout(), Some(Duration::from_secs(30)));
//! assert_eq!(effective.metadata().len(), 2);
//! ```

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::exponential_backoff::ExponentialBackoff;
use crate::retry_policy::{NeverRetry, RetryPolicy, RetryPolicyArg};
use crate::retry_settings::RetrySettings;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The options for a single call, or the defaults for a method or service.
///
/// The value is immutable once built: the `set_*` functions consume the
/// options and return a modified copy.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    retry_settings: Option<RetrySettings>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    cancellation: Option<CancellationToken>,
    metadata: BTreeMap<String, String>,
}

impl CallOptions {
    /// Creates options where every field is absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout.
    ///
    /// With retries enabled each attempt is bounded by the smaller of this
    /// value and the time remaining in the retry settings' total timeout.
    pub fn set_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.timeout = Some(v.into());
        self
    }

    /// Sets the retry settings: retryable codes, backoff and total timeout.
    pub fn set_retry_settings(mut self, v: RetrySettings) -> Self {
        self.retry_settings = Some(v);
        self
    }

    /// Overrides the retry policy derived from the retry settings.
    ///
    /// Most applications only need [set_retry_settings][Self::set_retry_settings].
    /// Use this to plug in a custom classifier, or
    /// [NeverRetry][crate::retry_policy::NeverRetry] to disable retries for a
    /// single call.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = Some(v.into().0);
        self
    }

    /// Overrides the backoff policy derived from the retry settings.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff_policy = Some(v.into().0);
        self
    }

    /// Sets the cancellation token for the call.
    ///
    /// Cancelling the token aborts the call at the next suspension point, and
    /// the call fails with [Code::Cancelled][crate::error::rpc::Code::Cancelled].
    pub fn set_cancellation(mut self, v: CancellationToken) -> Self {
        self.cancellation = Some(v);
        self
    }

    /// Adds a metadata entry sent with each attempt.
    pub fn insert_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The retry settings, if any.
    pub fn retry_settings(&self) -> Option<&RetrySettings> {
        self.retry_settings.as_ref()
    }

    /// The retry policy override, if any.
    pub fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    /// The backoff policy override, if any.
    pub fn backoff_policy(&self) -> Option<&Arc<dyn BackoffPolicy>> {
        self.backoff_policy.as_ref()
    }

    /// The cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The metadata entries.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Merges these options over `defaults`.
    ///
    /// Fields present in `self` win, absent fields take the value in
    /// `defaults`. Metadata entries are combined, on duplicate keys the entry
    /// in `self` wins. Neither input is modified.
    pub fn merge(&self, defaults: &CallOptions) -> CallOptions {
        let mut metadata = defaults.metadata.clone();
        metadata.extend(
            self.metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        CallOptions {
            timeout: self.timeout.or(defaults.timeout),
            retry_settings: self
                .retry_settings
                .clone()
                .or_else(|| defaults.retry_settings.clone()),
            retry_policy: self
                .retry_policy
                .clone()
                .or_else(|| defaults.retry_policy.clone()),
            backoff_policy: self
                .backoff_policy
                .clone()
                .or_else(|| defaults.backoff_policy.clone()),
            cancellation: self
                .cancellation
                .clone()
                .or_else(|| defaults.cancellation.clone()),
            metadata,
        }
    }

    /// The retry policy used by the retry loop.
    ///
    /// Without an override or retry settings the call makes a single attempt.
    pub(crate) fn effective_retry_policy(&self) -> Arc<dyn RetryPolicy> {
        if let Some(p) = &self.retry_policy {
            return p.clone();
        }
        match &self.retry_settings {
            Some(s) => s.retry_policy(),
            None => Arc::new(NeverRetry),
        }
    }

    /// The backoff policy used by the retry loop.
    pub(crate) fn effective_backoff_policy(&self) -> Arc<dyn BackoffPolicy> {
        if let Some(p) = &self.backoff_policy {
            return p.clone();
        }
        match &self.retry_settings {
            Some(s) => s.backoff_policy(),
            None => Arc::new(ExponentialBackoff::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::error::rpc::{Code, Status};
    use crate::exponential_backoff::ExponentialBackoffBuilder;
    use crate::retry_policy::AlwaysRetry;

    #[test]
    fn defaults() {
        let options = CallOptions::new();
        assert!(options.timeout().is_none());
        assert!(options.retry_settings().is_none());
        assert!(options.retry_policy().is_none());
        assert!(options.backoff_policy().is_none());
        assert!(options.cancellation().is_none());
        assert!(options.metadata().is_empty());
    }

    #[test]
    fn setters() -> anyhow::Result<()> {
        let settings = RetrySettings::builder().build()?;
        let token = CancellationToken::new();
        let options = CallOptions::new()
            .set_timeout(Duration::from_secs(5))
            .set_retry_settings(settings.clone())
            .set_retry_policy(AlwaysRetry)
            .set_backoff_policy(ExponentialBackoff::default())
            .set_cancellation(token.clone())
            .insert_metadata("k", "v");
        assert_eq!(options.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(options.retry_settings(), Some(&settings));
        assert!(options.retry_policy().is_some());
        assert!(options.backoff_policy().is_some());
        assert!(options.cancellation().is_some());
        assert_eq!(options.metadata().get("k").map(String::as_str), Some("v"));
        Ok(())
    }

    #[test]
    fn merge_precedence() -> anyhow::Result<()> {
        let service_settings = RetrySettings::builder()
            .with_total_timeout(Duration::from_secs(600))
            .build()?;
        let method_settings = RetrySettings::builder()
            .with_total_timeout(Duration::from_secs(30))
            .build()?;
        let service = CallOptions::new()
            .set_timeout(Duration::from_secs(60))
            .set_retry_settings(service_settings);
        let method = CallOptions::new().set_retry_settings(method_settings.clone());
        let call = CallOptions::new().set_timeout(Duration::from_secs(5));

        let got = call.merge(&method.merge(&service));
        assert_eq!(got.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(got.retry_settings(), Some(&method_settings));

        let got = CallOptions::new().merge(&method.merge(&service));
        assert_eq!(got.timeout(), Some(Duration::from_secs(60)));
        Ok(())
    }

    #[test]
    fn merge_is_pure() {
        let defaults = CallOptions::new().set_timeout(Duration::from_secs(60));
        let call = CallOptions::new().insert_metadata("a", "1");
        let _ = call.merge(&defaults);
        assert!(call.timeout().is_none());
        assert!(defaults.metadata().is_empty());
    }

    #[test]
    fn merge_metadata() {
        let defaults = CallOptions::new()
            .insert_metadata("a", "default")
            .insert_metadata("b", "default");
        let call = CallOptions::new()
            .insert_metadata("b", "call")
            .insert_metadata("c", "call");
        let got = call.merge(&defaults);
        let got = got
            .metadata()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(got, vec![("a", "default"), ("b", "call"), ("c", "call")]);
    }

    #[test]
    fn merge_policies_and_cancellation() {
        let token = CancellationToken::new();
        let defaults = CallOptions::new()
            .set_retry_policy(AlwaysRetry)
            .set_cancellation(token.clone());
        let got = CallOptions::new().merge(&defaults);
        assert!(got.retry_policy().is_some());
        token.cancel();
        assert!(got.cancellation().is_some_and(|t| t.is_cancelled()));
    }

    #[test]
    fn effective_policies_without_settings() {
        let options = CallOptions::new();
        let start = std::time::Instant::now();
        let transient = Error::service(Status::default().set_code(Code::Unavailable));
        let got = options.effective_retry_policy().on_error(start, 1, transient);
        assert!(got.is_permanent(), "{got:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn effective_policies_from_settings() -> anyhow::Result<()> {
        let settings = RetrySettings::builder()
            .with_retryable_codes([Code::Unavailable])
            .with_initial_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(1))
            .with_total_timeout(Duration::from_secs(10))
            .build()?;
        let options = CallOptions::new().set_retry_settings(settings);
        let start = tokio::time::Instant::now().into_std();
        let transient = Error::service(Status::default().set_code(Code::Unavailable));
        let got = options.effective_retry_policy().on_error(start, 1, transient);
        assert!(got.is_continue(), "{got:?}");
        assert_eq!(
            options.effective_retry_policy().remaining_time(start, 1),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            options.effective_backoff_policy().on_failure(start, 1),
            Duration::from_millis(250)
        );
        Ok(())
    }

    #[test]
    fn effective_policies_prefer_overrides() -> anyhow::Result<()> {
        let settings = RetrySettings::builder().build()?;
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(7))
            .with_maximum_delay(Duration::from_millis(7))
            .build()?;
        let options = CallOptions::new()
            .set_retry_settings(settings)
            .set_retry_policy(AlwaysRetry)
            .set_backoff_policy(backoff);
        let start = std::time::Instant::now();
        let permission = Error::service(Status::default().set_code(Code::PermissionDenied));
        let got = options.effective_retry_policy().on_error(start, 1, permission);
        assert!(got.is_continue(), "{got:?}");
        assert_eq!(
            options.effective_backoff_policy().on_failure(start, 3),
            Duration::from_millis(7)
        );
        Ok(())
    }
}
