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

//! The seam between callables and the wire transport.
//!
//! The transport moves opaque request and response payloads for a named
//! method. Errors returned by the transport must be classified with a
//! [Code][crate::error::rpc::Code]: use [Error::service] with the status
//! returned by the service, or [Error::io] when the service was not reached.

use crate::Result;
use crate::callable::{AttemptOptions, RawCall};
use crate::error::Error;
use crate::error::rpc::Status;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sends one request to a service method.
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Sends `request` to `method` and returns the response payload.
    ///
    /// The transport must give up after `options.timeout()`, if set.
    async fn invoke(&self, method: &str, request: Bytes, options: &AttemptOptions)
    -> Result<Bytes>;
}

/// Converts an error payload in the JSON error envelope into an [Error].
///
/// Payloads that cannot be parsed are reported as deserialization errors.
pub fn status_error(payload: &Bytes) -> Error {
    match Status::try_from(payload) {
        Ok(status) => Error::service(status),
        Err(e) => e,
    }
}

/// A [RawCall] that encodes requests and decodes responses as JSON.
pub struct JsonCall<Req, Resp> {
    transport: Arc<dyn Transport>,
    method: String,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> JsonCall<Req, Resp> {
    /// Creates a call for `method` over `transport`.
    pub fn new<V: Into<String>>(transport: Arc<dyn Transport>, method: V) -> Self {
        Self {
            transport,
            method: method.into(),
            _phantom: PhantomData,
        }
    }
}

impl<Req, Resp> std::fmt::Debug for JsonCall<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCall")
            .field("transport", &self.transport)
            .field("method", &self.method)
            .finish()
    }
}

#[async_trait::async_trait]
impl<Req, Resp> RawCall<Req, Resp> for JsonCall<Req, Resp>
where
    Req: Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    async fn call(&self, req: Req, options: &AttemptOptions) -> Result<Resp> {
        let payload = serde_json::to_vec(&req).map_err(Error::ser)?;
        let response = self
            .transport
            .invoke(&self.method, Bytes::from(payload), options)
            .await?;
        serde_json::from_slice(&response).map_err(Error::deser)
    }

    fn method_name(&self) -> &str {
        &self.method
    }
}
