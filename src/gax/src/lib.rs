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

//! Call execution for generated API clients.
//!
//! Generated clients wrap each RPC in an [ApiCallable][callable::ApiCallable],
//! which adds retries with exponential backoff, per-attempt timeouts and
//! cancellation. Methods returning lists are exposed as lazy streams with
//! [paginator], and methods accepting repeated elements can be sent in
//! [bundles][bundling].
//!
//! Per-method defaults come from the JSON [client configuration][client_config],
//! and are combined with per-call [options][options::CallOptions].

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping RPCs.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The core error types used by generated clients.
pub mod error;

pub mod backoff_policy;
pub mod bundling;
pub mod callable;
pub mod client_config;
pub mod credentials;
pub mod exponential_backoff;
pub mod options;
pub mod paginator;
pub mod polling_backoff_policy;
pub mod retry_policy;
pub mod retry_result;
pub mod retry_settings;
pub mod transport;

/// The retry loop shared by callables and operation pollers.
#[doc(hidden)]
pub mod retry_loop_internal;
