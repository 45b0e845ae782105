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

use crate::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The result of a bundled call.
///
/// Resolves once the bundle containing the request completes, with the part of
/// the response for this request. If the call is cancelled before the bundle is
/// sent, the request is removed from the bundle and the handle resolves with a
/// `CANCELLED` error.
///
/// The request is sent whether or not the handle is awaited.
#[pin_project::pin_project]
pub struct BundleHandle<Resp> {
    #[pin]
    inner: Pin<Box<dyn Future<Output = Result<Resp>> + Send>>,
}

impl<Resp> BundleHandle<Resp> {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Future<Output = Result<Resp>> + Send + 'static,
    {
        Self { inner: Box::pin(f) }
    }
}

impl<Resp> std::fmt::Debug for BundleHandle<Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleHandle").finish_non_exhaustive()
    }
}

impl<Resp> Future for BundleHandle<Resp> {
    type Output = Result<Resp>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}
