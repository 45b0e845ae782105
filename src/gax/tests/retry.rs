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

//! Verify the retry loop of [ApiCallable] from outside the crate.
//!
//! The raw calls record when each attempt starts. All tests run with a
//! paused clock, so the recorded times are exact.

#[cfg(test)]
mod tests {
    use gax::Result;
    use gax::callable::{ApiCallable, AttemptOptions, build_callable, raw_call_fn};
    use gax::error::Error;
    use gax::error::rpc::{Code, Status};
    use gax::options::CallOptions;
    use gax::retry_settings::RetrySettings;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use test_case::test_case;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    type Attempts = Arc<Mutex<Vec<(Duration, AttemptOptions)>>>;

    /// A callable whose attempts always fail with `code`.
    fn failing(code: Code, defaults: CallOptions) -> (ApiCallable<String, String>, Attempts) {
        let start = Instant::now();
        let attempts = Attempts::default();
        let captured = attempts.clone();
        let raw = raw_call_fn(move |_req: String, options: AttemptOptions| {
            captured
                .lock()
                .unwrap()
                .push((Instant::now() - start, options));
            async move {
                Err::<String, Error>(Error::service(
                    Status::default().set_code(code).set_message("uh-oh"),
                ))
            }
        })
        .with_method_name("google.test.v1.Echo/Echo");
        (build_callable(raw, defaults), attempts)
    }

    fn settings(total: Duration) -> anyhow::Result<RetrySettings> {
        Ok(RetrySettings::builder()
            .with_retryable_codes([Code::Unavailable, Code::DeadlineExceeded])
            .with_initial_delay(Duration::from_millis(100))
            .with_delay_multiplier(2.0)
            .with_max_delay(Duration::from_secs(60))
            .with_total_timeout(total)
            .build()?)
    }

    fn times(attempts: &Attempts) -> Vec<Duration> {
        attempts.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion() -> anyhow::Result<()> {
        let _guard = gapic_test_utils::tracing::enable_tracing();
        let defaults =
            CallOptions::new().set_retry_settings(settings(Duration::from_millis(500))?);
        let (callable, attempts) = failing(Code::Unavailable, defaults);
        let start = Instant::now();
        let err = callable
            .call("ping".to_string(), CallOptions::new())
            .await
            .expect_err("every attempt fails");
        let elapsed = Instant::now() - start;

        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.code(), Code::Unavailable, "{err:?}");
        assert_eq!(err.status().map(|s| s.message.as_str()), Some("uh-oh"));
        // Attempts at 0ms, 100ms and 300ms. The next backoff (400ms) would
        // end after the 500ms budget.
        assert_eq!(
            times(&attempts),
            [0, 100, 300].map(Duration::from_millis).to_vec()
        );
        assert_eq!(err.attempt_count(), Some(3));
        assert!(elapsed <= Duration::from_millis(500), "{elapsed:?}");
        assert_eq!(err.elapsed(), Some(elapsed));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeouts_shrink_with_remaining_time() -> anyhow::Result<()> {
        let defaults = CallOptions::new()
            .set_timeout(Duration::from_millis(250))
            .set_retry_settings(settings(Duration::from_millis(500))?);
        let (callable, attempts) = failing(Code::Unavailable, defaults);
        let _ = callable
            .call("ping".to_string(), CallOptions::new())
            .await
            .expect_err("every attempt fails");
        let timeouts = attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, o)| o.timeout())
            .collect::<Vec<_>>();
        assert_eq!(
            timeouts,
            vec![
                Some(Duration::from_millis(250)),
                Some(Duration::from_millis(250)),
                Some(Duration::from_millis(200)),
            ]
        );
        Ok(())
    }

    #[test_case(Code::InvalidArgument)]
    #[test_case(Code::NotFound)]
    #[test_case(Code::PermissionDenied)]
    #[test_case(Code::Internal)]
    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuit(code: Code) -> anyhow::Result<()> {
        let defaults = CallOptions::new().set_retry_settings(settings(Duration::from_secs(60))?);
        let (callable, attempts) = failing(code, defaults);
        let start = Instant::now();
        let err = callable
            .call("ping".to_string(), CallOptions::new())
            .await
            .expect_err("the attempt fails");
        assert_eq!(err.code(), code, "{err:?}");
        assert!(!err.is_exhausted(), "{err:?}");
        assert_eq!(err.attempt_count(), Some(1));
        assert_eq!(times(&attempts), vec![Duration::ZERO]);
        assert_eq!(Instant::now(), start);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff() -> anyhow::Result<()> {
        let defaults = CallOptions::new().set_retry_settings(
            RetrySettings::builder()
                .with_retryable_codes([Code::Unavailable])
                .with_initial_delay(Duration::from_secs(5))
                .with_total_timeout(Duration::from_secs(600))
                .build()?,
        );
        let (callable, attempts) = failing(Code::Unavailable, defaults);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let start = Instant::now();
        let err = callable
            .call(
                "ping".to_string(),
                CallOptions::new().set_cancellation(token),
            )
            .await
            .expect_err("the call is cancelled");
        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
        // No attempt after the cancellation.
        assert_eq!(times(&attempts), vec![Duration::ZERO]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_call() -> anyhow::Result<()> {
        let (callable, attempts) = failing(Code::Unavailable, CallOptions::new());
        let token = CancellationToken::new();
        token.cancel();
        let err = callable
            .call(
                "ping".to_string(),
                CallOptions::new().set_cancellation(token),
            )
            .await
            .expect_err("the call is cancelled");
        assert!(err.is_cancelled(), "{err:?}");
        assert!(times(&attempts).is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_options_override_defaults() -> anyhow::Result<()> {
        // The defaults would retry for a minute, the call overrides them with
        // a shorter budget and extra metadata.
        let defaults = CallOptions::new()
            .set_retry_settings(settings(Duration::from_secs(60))?)
            .insert_metadata("x-goog-api-client", "gapic/0.1")
            .insert_metadata("x-goog-request-params", "name=default");
        let (callable, attempts) = failing(Code::Unavailable, defaults);
        let options = CallOptions::new()
            .set_retry_settings(settings(Duration::from_millis(150))?)
            .insert_metadata("x-goog-request-params", "name=override");
        let err = callable
            .call("ping".to_string(), options)
            .await
            .expect_err("every attempt fails");
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(
            times(&attempts),
            [0, 100].map(Duration::from_millis).to_vec()
        );
        let attempts = attempts.lock().unwrap();
        let metadata = attempts[0].1.metadata();
        assert_eq!(
            metadata.get("x-goog-api-client").map(String::as_str),
            Some("gapic/0.1")
        );
        assert_eq!(
            metadata.get("x-goog-request-params").map(String::as_str),
            Some("name=override")
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_are_retried() -> anyhow::Result<()> {
        let count = Arc::new(Mutex::new(0_u32));
        let captured = count.clone();
        let raw = raw_call_fn(move |req: String, _: AttemptOptions| {
            let attempt = {
                let mut count = captured.lock().unwrap();
                *count += 1;
                *count
            };
            async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Result::<String>::Ok(format!("{req}-{attempt}"))
            }
        });
        let defaults = CallOptions::new()
            .set_timeout(Duration::from_secs(1))
            .set_retry_settings(settings(Duration::from_secs(60))?);
        let callable = build_callable(raw, defaults);
        let start = Instant::now();
        let got = callable.call("ping".to_string(), CallOptions::new()).await?;
        assert_eq!(got, "ping-2");
        assert_eq!(
            Instant::now() - start,
            Duration::from_secs(1) + Duration::from_millis(100)
        );
        Ok(())
    }
}
