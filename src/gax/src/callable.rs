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

//! Wraps a one-shot RPC into a call with timeouts, retries and cancellation.
//!
//! Generated clients provide a [RawCall] for each method: a function that
//! makes exactly one attempt. [build_callable] combines it with the method
//! defaults into an [ApiCallable]. The callable merges per-call options over
//! the defaults, bounds each attempt with a timeout, retries transient
//! failures with backoff, and stops promptly if the caller cancels.
//!
//! Attaching a page descriptor ([ApiCallable::paged]) or a bundle descriptor
//! ([ApiCallable::bundled]) changes the shape of the result.
//!
//! # Example
//! ```
//! # use gax::callable::*;
//! # use gax::options::CallOptions;
//! # use gax::retry_settings::RetrySettings;
//! # use gax::error::rpc::Code;
//! use std::time::Duration;
//! # tokio_test::block_on(async {
//! let raw = raw_call_fn(|name: String, _attempt: AttemptOptions| async move {
//!     Ok::<_, gax::error::Error>(format!("hello {name}"))
//! });
//! let defaults = CallOptions::new()
//!     .set_timeout(Duration::from_secs(30))
//!     .set_retry_settings(RetrySettings::builder()
//!         .with_retryable_codes([Code::Unavailable])
//!         .build()?);
//! let callable = build_callable(raw, defaults);
//! let response = callable.call("world".to_string(), CallOptions::new()).await?;
//! assert_eq!(response, "hello world");
//! # anyhow::Ok(()) }).unwrap();
//! ```

use crate::Result;
use crate::error::Error;
use crate::options::CallOptions;
use crate::retry_loop_internal::{effective_timeout, retry_loop};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::Instrument;

/// The options for a single attempt, as seen by the transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttemptOptions {
    timeout: Option<Duration>,
    attempt_count: u32,
    metadata: BTreeMap<String, String>,
}

impl AttemptOptions {
    /// Creates options for the first attempt, without a timeout or metadata.
    pub fn new() -> Self {
        Self {
            attempt_count: 1,
            ..Default::default()
        }
    }

    /// Sets the timeout for this attempt.
    pub fn set_timeout<V: Into<Option<Duration>>>(mut self, v: V) -> Self {
        self.timeout = v.into();
        self
    }

    /// Sets the attempt number, starting at 1.
    pub fn set_attempt_count(mut self, v: u32) -> Self {
        self.attempt_count = v;
        self
    }

    /// Replaces the metadata entries.
    pub fn set_metadata(mut self, v: BTreeMap<String, String>) -> Self {
        self.metadata = v;
        self
    }

    /// The timeout for this attempt, the transport should not wait longer.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The attempt number, starting at 1.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The metadata to send with the request.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// Makes a single attempt of a typed RPC.
///
/// Implementations must not retry, the [ApiCallable] owns the retry loop.
#[async_trait::async_trait]
pub trait RawCall<Req, Resp>: std::fmt::Debug + Send + Sync {
    /// Sends `req` once and waits for the response.
    async fn call(&self, req: Req, options: &AttemptOptions) -> Result<Resp>;

    /// The name of the RPC, used in tracing spans.
    fn method_name(&self) -> &str {
        "unknown"
    }
}

/// Creates a [RawCall] from an async function.
///
/// The function receives the request and a copy of the attempt options.
pub fn raw_call_fn<F>(f: F) -> RawCallFn<F> {
    RawCallFn {
        f,
        method_name: "unknown".into(),
    }
}

/// A [RawCall] implemented by an async function, see [raw_call_fn].
pub struct RawCallFn<F> {
    f: F,
    method_name: String,
}

impl<F> RawCallFn<F> {
    /// Sets the method name reported in tracing spans.
    pub fn with_method_name<V: Into<String>>(mut self, v: V) -> Self {
        self.method_name = v.into();
        self
    }
}

impl<F> std::fmt::Debug for RawCallFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCallFn")
            .field("method_name", &self.method_name)
            .finish()
    }
}

#[async_trait::async_trait]
impl<Req, Resp, F, Fut> RawCall<Req, Resp> for RawCallFn<F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Req, AttemptOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp>> + Send,
{
    async fn call(&self, req: Req, options: &AttemptOptions) -> Result<Resp> {
        (self.f)(req, options.clone()).await
    }

    fn method_name(&self) -> &str {
        &self.method_name
    }
}

/// Combines a [RawCall] with the method defaults.
///
/// `defaults` should already include the service defaults, see
/// [CallOptions::merge].
pub fn build_callable<Req, Resp, R>(raw: R, defaults: CallOptions) -> ApiCallable<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    R: RawCall<Req, Resp> + 'static,
{
    ApiCallable {
        raw: Arc::new(raw),
        defaults,
    }
}

/// A retrying, cancellable wrapper around one RPC.
pub struct ApiCallable<Req, Resp> {
    raw: Arc<dyn RawCall<Req, Resp>>,
    defaults: CallOptions,
}

impl<Req, Resp> Clone for ApiCallable<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            defaults: self.defaults.clone(),
        }
    }
}

impl<Req, Resp> std::fmt::Debug for ApiCallable<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCallable")
            .field("raw", &self.raw)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl<Req, Resp> ApiCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    /// The method defaults.
    pub fn defaults(&self) -> &CallOptions {
        &self.defaults
    }

    /// Makes the call, retrying transient failures.
    ///
    /// `options` are merged over the method defaults. Without retry settings
    /// the call makes a single attempt. Otherwise failures with a retryable
    /// code are retried until the total timeout elapses, each attempt bounded
    /// by `min(timeout, remaining time)`.
    ///
    /// Cancelling the token in the options aborts the current attempt or
    /// backoff, and the call fails with `CANCELLED`.
    pub async fn call(&self, req: Req, options: CallOptions) -> Result<Resp> {
        let options = options.merge(&self.defaults);
        let span = tracing::info_span!(
            "gapic_call",
            rpc.method = self.raw.method_name(),
            rpc.attempt_count = tracing::field::Empty,
            rpc.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let result = self
            .call_with_options(req, &options, attempts.clone())
            .instrument(span.clone())
            .await;
        span.record("rpc.attempt_count", attempts.load(Ordering::Relaxed));
        match &result {
            Ok(_) => {
                span.record("rpc.status_code", "OK");
                span.record("otel.status_code", "OK");
            }
            Err(e) => {
                span.record("rpc.status_code", e.code().name());
                span.record("otel.status_code", "ERROR");
            }
        }
        result
    }

    async fn call_with_options(
        &self,
        req: Req,
        options: &CallOptions,
        attempts: Arc<AtomicU32>,
    ) -> Result<Resp> {
        let raw = self.raw.clone();
        let timeout = options.timeout();
        let metadata = options.metadata().clone();
        let inner = move |attempt_count: u32, remaining: Option<Duration>| {
            attempts.store(attempt_count, Ordering::Relaxed);
            let attempt = AttemptOptions::new()
                .set_timeout(effective_timeout(timeout, remaining))
                .set_attempt_count(attempt_count)
                .set_metadata(metadata.clone());
            let raw = raw.clone();
            let req = req.clone();
            async move { attempt_with_timeout(raw.as_ref(), req, &attempt).await }
        };
        retry_loop(
            inner,
            tokio::time::sleep,
            options.cancellation().cloned(),
            options.effective_retry_policy(),
            options.effective_backoff_policy(),
        )
        .await
    }
}

async fn attempt_with_timeout<Req, Resp>(
    raw: &dyn RawCall<Req, Resp>,
    req: Req,
    attempt: &AttemptOptions,
) -> Result<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let pending = raw.call(req, attempt);
    match attempt.timeout() {
        None => pending.await,
        Some(t) => tokio::time::timeout(t, pending)
            .await
            .unwrap_or_else(|elapsed| Err(Error::timeout(elapsed))),
    }
}
