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

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Logs to stdout for the current thread until the guard is dropped.
///
/// The level defaults to `warn` and can be changed with `RUST_LOG`, for
/// example `RUST_LOG=gax=debug` shows every retry decision.
pub fn enable_tracing() -> ::tracing::subscriber::DefaultGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}
