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

//! Request bundling.
//!
//! Some methods accept a repeated field of independent elements, for example
//! the messages in a publish request. A [BundlingCallable] accepts many small
//! requests and sends them as fewer, larger requests. Requests with the same
//! [key][BundleDescriptor::key] are merged until one of the thresholds in
//! [BundlingOptions] is reached. Each caller then receives the part of the
//! response for its own elements.
//!
//! # Example
//! ```
//! # use gax::bundling::*;
//! # use gax::callable::ApiCallable;
//! # use gax::options::CallOptions;
//! # async fn sample<D>(publish: ApiCallable<String, String>, descriptor: D) -> gax::Result<()>
//! # where D: BundleDescriptor<String, String> {
//! let bundled = publish.bundled(descriptor, BundlingOptions::new());
//! let h1 = bundled.call("a".to_string(), CallOptions::new());
//! let h2 = bundled.call("b".to_string(), CallOptions::new());
//! let (r1, r2) = (h1.await?, h2.await?);
//! # Ok(()) }
//! ```

mod actor;
mod batch;
mod descriptor;
mod handle;
mod options;

pub use descriptor::BundleDescriptor;
pub use handle::BundleHandle;
pub use options::BundlingOptions;

use crate::callable::ApiCallable;
use crate::error::Error;
use crate::options::CallOptions;
use crate::retry_loop_internal::cancellable;
use actor::{Dispatcher, PendingRequest, ToDispatcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

/// Accepts requests and sends them in bundles.
///
/// Created by [ApiCallable::bundled]. Clones share the same bundles. Dropping
/// the last clone sends any pending bundles and stops the background tasks.
pub struct BundlingCallable<Req, Resp> {
    tx: mpsc::UnboundedSender<ToDispatcher<Req, Resp>>,
    next_id: Arc<AtomicU64>,
}

impl<Req, Resp> Clone for BundlingCallable<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<Req, Resp> std::fmt::Debug for BundlingCallable<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundlingCallable")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> ApiCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Clone + Send + 'static,
{
    /// Bundles the requests sent to this callable.
    ///
    /// Bundles are sent with the defaults of this callable, including its
    /// retry settings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bundled<D>(self, descriptor: D, options: BundlingOptions) -> BundlingCallable<Req, Resp>
    where
        D: BundleDescriptor<Req, Resp>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Dispatcher::new(self, Arc::new(descriptor), options, rx).run());
        BundlingCallable {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<Req, Resp> BundlingCallable<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Adds `req` to the pending bundle for its key.
    ///
    /// Only the cancellation token in `options` applies to bundled calls.
    /// Cancelling it before the bundle is sent removes the elements of `req`
    /// from the bundle.
    pub fn call(&self, req: Req, options: CallOptions) -> BundleHandle<Resp> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // On failure `tx` is dropped and the handle reports the error.
        let _ = self.tx.send(ToDispatcher::Call(PendingRequest {
            id,
            request: req,
            tx,
        }));
        let dispatcher = self.tx.downgrade();
        let cancel = options.cancellation().cloned();
        BundleHandle::new(async move {
            match cancellable(cancel.as_ref(), rx).await {
                Some(Ok(result)) => result,
                Some(Err(_)) => Err(Error::other(
                    "the bundling task stopped before completing the request",
                )),
                None => {
                    if let Some(dispatcher) = dispatcher.upgrade() {
                        let _ = dispatcher.send(ToDispatcher::Cancel(id));
                    }
                    Err(Error::cancelled())
                }
            }
        })
    }

    /// Sends all pending bundles and waits until they complete.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ToDispatcher::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
