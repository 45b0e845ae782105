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

use super::Result;
use super::backoff_policy::BackoffPolicy;
use super::error::Error;
use super::retry_policy::RetryPolicy;
use super::retry_result::RetryResult;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs the retry loop for a given function.
///
/// This function calls `inner` as long as (1) the retry policy has not
/// expired, (2) the inner function has not returned a successful response,
/// and (3) the caller has not cancelled the call.
///
/// `inner` receives the attempt number (starting at 1) and the time remaining
/// in the retry policy, if the policy is time based.
///
/// In between calls the function waits the amount of time prescribed by the
/// backoff policy, using `sleep` to implement any sleep. It gives up without
/// sleeping if the policy would expire before the backoff completes.
///
/// Every error returned by the loop carries the number of attempts and the
/// elapsed time.
pub async fn retry_loop<F, Fut, S, SFut, Response>(
    mut inner: F,
    sleep: S,
    cancel: Option<CancellationToken>,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
) -> Result<Response>
where
    F: FnMut(u32, Option<Duration>) -> Fut + Send,
    Fut: Future<Output = Result<Response>> + Send,
    S: Fn(Duration) -> SFut + Send,
    SFut: Future<Output = ()> + Send,
{
    let loop_start = tokio::time::Instant::now();
    let start = loop_start.into_std();
    let annotate = |e: Error, attempt_count: u32| {
        e.with_retry_details(attempt_count, loop_start.elapsed())
    };
    let mut attempt_count = 0_u32;
    // The backoff delay and error from the previous attempt, if any.
    let mut pending: Option<(Duration, Error)> = None;
    loop {
        if let Some((delay, prev)) = pending.take() {
            let remaining = retry_policy.remaining_time(start, attempt_count);
            if remaining.is_some_and(|r| r < delay) {
                tracing::debug!(
                    attempt_count,
                    ?delay,
                    ?remaining,
                    "retry policy exhausted before backoff"
                );
                return Err(annotate(Error::exhausted(prev), attempt_count));
            }
            tracing::debug!(
                attempt_count,
                ?delay,
                error = %prev,
                "retrying after transient error"
            );
            if cancellable(cancel.as_ref(), sleep(delay)).await.is_none() {
                return Err(annotate(Error::cancelled(), attempt_count));
            }
        }
        let remaining = retry_policy.remaining_time(start, attempt_count);
        attempt_count += 1;
        let result = match cancellable(cancel.as_ref(), inner(attempt_count, remaining)).await {
            None => return Err(annotate(Error::cancelled(), attempt_count)),
            Some(r) => r,
        };
        let error = match result {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        match retry_policy.on_error(start, attempt_count, error) {
            RetryResult::Permanent(e) => {
                tracing::debug!(attempt_count, error = %e, "permanent error");
                return Err(annotate(e, attempt_count));
            }
            RetryResult::Exhausted(e) => {
                tracing::debug!(attempt_count, error = %e, "retry policy exhausted");
                return Err(annotate(Error::exhausted(e), attempt_count));
            }
            RetryResult::Continue(e) => {
                let delay = backoff_policy.on_failure(start, attempt_count);
                pending = Some((delay, e));
            }
        }
    }
}

/// Awaits `fut` unless `cancel` fires first, returns `None` on cancellation.
///
/// Cancellation wins if both are ready. Dropping `fut` releases any timer or
/// request it holds.
pub(crate) async fn cancellable<F>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Option<F::Output>
where
    F: Future,
{
    match cancel {
        None => Some(fut.await),
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            v = fut => Some(v),
        },
    }
}

/// Computes the timeout for the next attempt, given the per-attempt timeout
/// and the time remaining in the retry policy.
pub fn effective_timeout(
    attempt_timeout: Option<Duration>,
    remaining_time: Option<Duration>,
) -> Option<Duration> {
    match (attempt_timeout, remaining_time) {
        (None, None) => None,
        (None, Some(t)) => Some(t),
        (Some(t), None) => Some(t),
        (Some(a), Some(r)) => Some(std::cmp::min(a, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc::{Code, Status};
    use crate::exponential_backoff::ExponentialBackoffBuilder;
    use crate::retry_policy::{RetryPolicyExt, RetryableCodes};
    use std::error::Error as _;
    use test_case::test_case;

    #[test_case(None, None, None)]
    #[test_case(Some(Duration::from_secs(4)), Some(Duration::from_secs(4)), None)]
    #[test_case(Some(Duration::from_secs(4)), None, Some(Duration::from_secs(4)))]
    #[test_case(
        Some(Duration::from_secs(2)),
        Some(Duration::from_secs(2)),
        Some(Duration::from_secs(4))
    )]
    #[test_case(
        Some(Duration::from_secs(2)),
        Some(Duration::from_secs(4)),
        Some(Duration::from_secs(2))
    )]
    fn effective_timeouts(
        want: Option<Duration>,
        remaining: Option<Duration>,
        attempt: Option<Duration>,
    ) {
        assert_eq!(effective_timeout(attempt, remaining), want);
    }

    #[tokio::test]
    async fn immediate_success() -> anyhow::Result<()> {
        let mut call = MockCall::new();
        call.expect_call()
            .once()
            .withf(|attempt, _| *attempt == 1)
            .returning(|_, _| success());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_remaining_time()
            .once()
            .return_const(None);
        let backoff_policy = MockBackoffPolicy::new();
        let sleep = MockSleep::new();

        let backoff = move |d| sleep.sleep(d);
        let response = retry_loop(
            inner,
            backoff,
            None,
            to_retry_policy(retry_policy),
            to_backoff_policy(backoff_policy),
        )
        .await?;
        assert_eq!(response, "success");
        Ok(())
    }

    #[tokio::test]
    async fn immediate_failure() -> anyhow::Result<()> {
        let mut call = MockCall::new();
        call.expect_call().once().returning(|_, _| permanent());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_remaining_time()
            .once()
            .return_const(None);
        retry_policy
            .expect_on_error()
            .once()
            .returning(|_, _, e| RetryResult::Permanent(e));
        let backoff_policy = MockBackoffPolicy::new();
        let sleep = MockSleep::new();

        let backoff = move |d| sleep.sleep(d);
        let response = retry_loop(
            inner,
            backoff,
            None,
            to_retry_policy(retry_policy),
            to_backoff_policy(backoff_policy),
        )
        .await;
        let err = response.expect_err("permanent errors are not retried");
        assert_eq!(err.code(), Code::PermissionDenied, "{err:?}");
        assert!(!err.is_exhausted(), "{err:?}");
        assert_eq!(err.attempt_count(), Some(1), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn retry_success() -> anyhow::Result<()> {
        // Two transient errors and then a successful response.
        let mut call_seq = mockall::Sequence::new();
        let mut call = MockCall::new();
        for (attempt, remaining) in [(1, 3), (2, 2)] {
            call.expect_call()
                .once()
                .in_sequence(&mut call_seq)
                .withf(move |a, d| {
                    *a == attempt && d == &Some(Duration::from_secs(remaining))
                })
                .returning(|_, _| transient());
        }
        call.expect_call()
            .once()
            .in_sequence(&mut call_seq)
            .withf(|a, d| *a == 3 && d == &Some(Duration::from_secs(1)))
            .returning(|_, _| success());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        // The policy is queried before each attempt, and before each backoff.
        let mut retry_seq = mockall::Sequence::new();
        let mut retry_policy = MockRetryPolicy::new();
        for remaining in [3, 2, 2, 1, 1] {
            retry_policy
                .expect_remaining_time()
                .once()
                .in_sequence(&mut retry_seq)
                .return_const(Some(Duration::from_secs(remaining)));
        }
        retry_policy
            .expect_on_error()
            .times(2)
            .returning(|_, _, e| RetryResult::Continue(e));

        let mut backoff_seq = mockall::Sequence::new();
        let mut backoff_policy = MockBackoffPolicy::new();
        let mut sleep_seq = mockall::Sequence::new();
        let mut sleep = MockSleep::new();
        for d in 1..=2 {
            backoff_policy
                .expect_on_failure()
                .once()
                .in_sequence(&mut backoff_seq)
                .withf(move |_, attempt| *attempt == d as u32)
                .return_const(Duration::from_millis(d));
            sleep
                .expect_sleep()
                .once()
                .in_sequence(&mut sleep_seq)
                .withf(move |got| got == &Duration::from_millis(d))
                .returning(|_| Box::pin(async {}));
        }

        let backoff = move |d| sleep.sleep(d);
        let response = retry_loop(
            inner,
            backoff,
            None,
            to_retry_policy(retry_policy),
            to_backoff_policy(backoff_policy),
        )
        .await;
        assert!(matches!(&response, Ok(s) if s == "success"), "{response:?}");
        Ok(())
    }

    #[tokio::test]
    async fn too_many_transients() -> anyhow::Result<()> {
        const ERRORS: usize = 3;
        let mut call = MockCall::new();
        call.expect_call()
            .times(ERRORS)
            .withf(|_, d| d.is_none())
            .returning(|_, _| transient());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        let mut retry_seq = mockall::Sequence::new();
        let mut retry_policy = MockRetryPolicy::new();
        retry_policy.expect_remaining_time().return_const(None);
        for _ in 0..ERRORS - 1 {
            retry_policy
                .expect_on_error()
                .once()
                .in_sequence(&mut retry_seq)
                .returning(|_, _, e| RetryResult::Continue(e));
        }
        retry_policy
            .expect_on_error()
            .once()
            .in_sequence(&mut retry_seq)
            .returning(|_, _, e| RetryResult::Exhausted(e));

        let mut backoff_policy = MockBackoffPolicy::new();
        backoff_policy
            .expect_on_failure()
            .times(ERRORS - 1)
            .return_const(Duration::from_millis(1));
        let mut sleep = MockSleep::new();
        sleep
            .expect_sleep()
            .times(ERRORS - 1)
            .returning(|_| Box::pin(async {}));

        let backoff = move |d| sleep.sleep(d);
        let response = retry_loop(
            inner,
            backoff,
            None,
            to_retry_policy(retry_policy),
            to_backoff_policy(backoff_policy),
        )
        .await;
        let err = response.expect_err("retry loop should terminate");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable, "{err:?}");
        assert_eq!(err.attempt_count(), Some(ERRORS as u32), "{err:?}");
        // The last seen status is available through the source.
        let got = err
            .source()
            .and_then(|e| e.downcast_ref::<Error>())
            .and_then(|e| e.status());
        assert_eq!(got, Some(&transient_status()), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_before_backoff() -> anyhow::Result<()> {
        let mut call = MockCall::new();
        call.expect_call().once().returning(|_, _| transient());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_remaining_time()
            .times(2)
            .return_const(Some(Duration::from_millis(50)));
        retry_policy
            .expect_on_error()
            .once()
            .returning(|_, _, e| RetryResult::Continue(e));
        let mut backoff_policy = MockBackoffPolicy::new();
        backoff_policy
            .expect_on_failure()
            .once()
            .return_const(Duration::from_millis(100));
        // The loop must not sleep if the backoff outlives the policy.
        let sleep = MockSleep::new();

        let backoff = move |d| sleep.sleep(d);
        let response = retry_loop(
            inner,
            backoff,
            None,
            to_retry_policy(retry_policy),
            to_backoff_policy(backoff_policy),
        )
        .await;
        let err = response.expect_err("retry loop should terminate");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable, "{err:?}");
        assert_eq!(err.attempt_count(), Some(1), "{err:?}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn total_timeout_schedule() -> anyhow::Result<()> {
        // 500ms total timeout, 100ms initial delay, doubling: attempts at
        // t=0, t=100ms and t=300ms. The next backoff (400ms) would end after
        // the total timeout.
        let retry_policy =
            RetryableCodes::new([Code::Unavailable]).with_time_limit(Duration::from_millis(500));
        let backoff_policy = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_maximum_delay(Duration::from_secs(1))
            .with_scaling(2.0)
            .build()?;
        let start = tokio::time::Instant::now();
        let mut attempts = Vec::new();
        let inner = |_: u32, _: Option<Duration>| {
            attempts.push(start.elapsed());
            std::future::ready(transient())
        };
        let response = retry_loop(
            inner,
            tokio::time::sleep,
            None,
            Arc::new(retry_policy),
            Arc::new(backoff_policy),
        )
        .await;
        let err = response.expect_err("retry loop should terminate");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable, "{err:?}");
        assert_eq!(err.attempt_count(), Some(3), "{err:?}");
        assert_eq!(err.elapsed(), Some(Duration::from_millis(300)), "{err:?}");
        let want = [0, 100, 300].map(Duration::from_millis);
        assert_eq!(attempts, want);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_backoff() -> anyhow::Result<()> {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let _task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mut call = MockCall::new();
        call.expect_call().once().returning(|_, _| transient());
        let inner = move |a, d| std::future::ready(call.call(a, d));

        let start = tokio::time::Instant::now();
        let response = retry_loop(
            inner,
            tokio::time::sleep,
            Some(token),
            Arc::new(RetryableCodes::new([Code::Unavailable])),
            Arc::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_delay(Duration::from_secs(10))
                    .build()?,
            ),
        )
        .await;
        let err = response.expect_err("cancelled calls fail");
        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(err.code(), Code::Cancelled, "{err:?}");
        assert_eq!(err.attempt_count(), Some(1), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() -> anyhow::Result<()> {
        let token = CancellationToken::new();
        token.cancel();
        // The mock panics if called.
        let call = MockCall::new();
        let inner = move |a, d| std::future::ready(call.call(a, d));
        let response = retry_loop(
            inner,
            tokio::time::sleep,
            Some(token),
            Arc::new(RetryableCodes::new([Code::Unavailable])),
            Arc::new(ExponentialBackoffBuilder::new().clamp()),
        )
        .await;
        let err = response.expect_err("cancelled calls fail");
        assert!(err.is_cancelled(), "{err:?}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_attempt() -> anyhow::Result<()> {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let _task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let inner = |_: u32, _: Option<Duration>| std::future::pending::<Result<String>>();
        let response = retry_loop(
            inner,
            tokio::time::sleep,
            Some(token),
            Arc::new(RetryableCodes::new([Code::Unavailable])),
            Arc::new(ExponentialBackoffBuilder::new().clamp()),
        )
        .await;
        let err = response.expect_err("cancelled calls fail");
        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(err.attempt_count(), Some(1), "{err:?}");
        Ok(())
    }

    fn success() -> Result<String> {
        Ok("success".into())
    }

    fn transient_status() -> Status {
        Status::default()
            .set_code(Code::Unavailable)
            .set_message("try-again")
    }

    fn transient() -> Result<String> {
        Err(Error::service(transient_status()))
    }

    fn permanent() -> Result<String> {
        let status = Status::default()
            .set_code(Code::PermissionDenied)
            .set_message("uh-oh");
        Err(Error::service(status))
    }

    fn to_retry_policy(mock: MockRetryPolicy) -> Arc<dyn RetryPolicy> {
        Arc::new(mock)
    }

    fn to_backoff_policy(mock: MockBackoffPolicy) -> Arc<dyn BackoffPolicy> {
        Arc::new(mock)
    }

    trait Call {
        fn call(&self, attempt: u32, d: Option<Duration>) -> Result<String>;
    }

    mockall::mock! {
        Call {}
        impl Call for Call {
            fn call(&self, attempt: u32, d: Option<Duration>) -> Result<String>;
        }
    }

    type SleepFuture = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    trait Sleep {
        fn sleep(&self, d: Duration) -> SleepFuture;
    }

    mockall::mock! {
        Sleep {}
        impl Sleep for Sleep {
            fn sleep(&self, d: Duration) -> SleepFuture;
        }
    }

    mockall::mock! {
        #[derive(Debug)]
        RetryPolicy {}
        impl RetryPolicy for RetryPolicy {
            fn on_error(
                &self,
                loop_start: std::time::Instant,
                attempt_count: u32,
                error: Error,
            ) -> RetryResult;
            fn remaining_time(
                &self,
                loop_start: std::time::Instant,
                attempt_count: u32,
            ) -> Option<Duration>;
        }
    }

    mockall::mock! {
        #[derive(Debug)]
        BackoffPolicy {}
        impl BackoffPolicy for BackoffPolicy {
            fn on_failure(&self, loop_start: std::time::Instant, attempt_count: u32) -> Duration;
        }
    }
}
