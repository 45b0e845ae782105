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

//! Build callables from a client configuration, the way generated clients do.

#[cfg(test)]
mod tests {
    use gax::callable::{AttemptOptions, build_callable, raw_call_fn};
    use gax::client_config::ServiceConfig;
    use gax::error::Error;
    use gax::error::rpc::{Code, Status};
    use gax::options::CallOptions;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    const SERVICE: &str = "google.example.library.v1.LibraryService";

    fn config() -> String {
        json!({
            "interfaces": {
                SERVICE: {
                    "retry_codes": {
                        "idempotent": ["UNAVAILABLE", "DEADLINE_EXCEEDED"],
                        "non_idempotent": []
                    },
                    "retry_params": {
                        "default": {
                            "initial_retry_delay_millis": 100,
                            "retry_delay_multiplier": 1.5,
                            "max_retry_delay_millis": 1000,
                            "total_timeout_millis": 2000
                        }
                    },
                    "methods": {
                        "GetBook": {
                            "timeout_millis": 300,
                            "retry_codes_name": "idempotent",
                            "retry_params_name": "default"
                        },
                        "CreateBook": {
                            "timeout_millis": 300,
                            "retry_codes_name": "non_idempotent",
                            "retry_params_name": "default"
                        }
                    }
                }
            }
        })
        .to_string()
    }

    type Attempts = Arc<Mutex<Vec<(Duration, AttemptOptions)>>>;

    fn always_unavailable() -> (
        impl gax::callable::RawCall<String, String> + 'static,
        Attempts,
    ) {
        let start = Instant::now();
        let attempts = Attempts::default();
        let captured = attempts.clone();
        let raw = raw_call_fn(move |_: String, options: AttemptOptions| {
            captured
                .lock()
                .unwrap()
                .push((Instant::now() - start, options));
            async {
                Err::<String, Error>(Error::service(
                    Status::default().set_code(Code::Unavailable),
                ))
            }
        });
        (raw, attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn idempotent_method_retries() -> anyhow::Result<()> {
        let config = ServiceConfig::from_json(&config(), SERVICE, Duration::from_secs(30))?
            .with_metadata("x-goog-api-client", "gl-rust/1.85 gapic/0.1");
        let (raw, attempts) = always_unavailable();
        let callable = build_callable(raw, config.method_options("GetBook"));
        let err = callable
            .call("books/1".to_string(), CallOptions::new())
            .await
            .expect_err("every attempt fails");
        assert!(err.is_exhausted(), "{err:?}");

        let attempts = attempts.lock().unwrap();
        // Attempts at 0, 100, 250, 475, 812.5 and 1318.75ms. The next delay,
        // 759.375ms, would end after the 2s budget.
        assert_eq!(attempts.len(), 6, "{attempts:?}");
        assert!(attempts.iter().all(|(_, o)| {
            o.timeout().is_some_and(|t| t <= Duration::from_millis(300))
                && o.metadata().get("x-goog-api-client").map(String::as_str)
                    == Some("gl-rust/1.85 gapic/0.1")
        }));
        assert!(attempts.last().is_some_and(|(t, _)| *t <= Duration::from_secs(2)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_method_does_not_retry() -> anyhow::Result<()> {
        let config = ServiceConfig::from_json(&config(), SERVICE, Duration::from_secs(30))?;
        let (raw, attempts) = always_unavailable();
        let callable = build_callable(raw, config.method_options("CreateBook"));
        let err = callable
            .call("books/1".to_string(), CallOptions::new())
            .await
            .expect_err("the attempt fails");
        assert_eq!(err.code(), Code::Unavailable, "{err:?}");
        assert_eq!(attempts.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn application_overrides() -> anyhow::Result<()> {
        let overrides = json!({
            "interfaces": {
                SERVICE: {
                    "methods": {
                        "CreateBook": { "retry_codes_name": "idempotent" }
                    }
                }
            }
        })
        .to_string();
        let config = ServiceConfig::from_json(&config(), SERVICE, Duration::from_secs(30))?
            .with_overrides(&overrides)?;
        let (raw, attempts) = always_unavailable();
        let callable = build_callable(raw, config.method_options("CreateBook"));
        let err = callable
            .call("books/1".to_string(), CallOptions::new())
            .await
            .expect_err("every attempt fails");
        assert!(err.is_exhausted(), "{err:?}");
        assert!(attempts.lock().unwrap().len() > 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_method_single_attempt_with_default_timeout() -> anyhow::Result<()> {
        let config = ServiceConfig::from_json(&config(), SERVICE, Duration::from_secs(30))?;
        let (raw, attempts) = always_unavailable();
        let callable = build_callable(raw, config.method_options("DeleteBook"));
        let _ = callable
            .call("books/1".to_string(), CallOptions::new())
            .await
            .expect_err("the attempt fails");
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].1.timeout(), Some(Duration::from_secs(30)));
        Ok(())
    }
}
