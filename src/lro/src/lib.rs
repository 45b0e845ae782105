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

//! Long-running operations.
//!
//! Some RPCs start work that takes minutes or hours to complete. These RPCs
//! return an [OperationRecord], which is wrapped in an [Operation] with typed
//! response and metadata. Applications can wait until the operation is done
//! with [Operation::wait_until_done], drive the polling loop themselves with
//! [Operation::poll], or use a [Poller] built from two closures.

use gax::Result;
use serde::de::DeserializeOwned;
use std::future::Future;

mod client;
mod operation;
mod wait;

pub use client::{
    CancelOperationRequest, DeleteOperationRequest, Empty, GetOperationRequest, OperationsClient,
    OperationsStub,
};
pub use operation::{Operation, OperationRecord, OperationResult};
pub use wait::WaitOptions;

/// The result of polling a long-running operation.
///
/// # Parameters
/// * `R` - the response type. This is the type returned when the operation
///   completes successfully.
/// * `M` - the metadata type. While operations are in progress the service
///   may return values of this type.
#[derive(Debug)]
pub enum PollingResult<R, M> {
    /// The operation is still in progress.
    ///
    /// Contains the latest metadata, if the service reported any and it
    /// could be decoded.
    InProgress(Option<M>),
    /// The operation completed, or it was not possible to query its state.
    ///
    /// The polling RPCs retry transient failures, so an error here is final.
    Completed(Result<R>),
}

/// The trait implemented by operation pollers.
///
/// # Parameters
/// * `R` - the response type, that is, the type of response included when the
///   long-running operation completes successfully.
/// * `M` - the metadata type, that is, the type returned by the service when
///   the long-running operation is still in progress.
pub trait Poller<R, M> {
    /// Queries the current status of the long-running operation.
    ///
    /// Returns `None` after the operation has completed.
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult<R, M>>>;

    /// Converts a poller to a [futures::Stream].
    fn into_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>>;
}

/// Creates a [Poller] from two closures.
///
/// `start` starts the operation. `query` fetches the latest state of the
/// operation with the given name. Both closures must capture any stubs and
/// call options they need.
///
/// # Example
/// ```
/// # use lro::{OperationRecord, Poller, PollingResult, new_poller};
/// # tokio_test::block_on(async {
/// # use gax::error::Error;
/// let start = || async { Ok::<_, Error>(OperationRecord::new("op-1")) };
/// let query = |name: String| async move {
///     Ok::<_, Error>(OperationRecord::new(name).set_response(serde_json::json!(42)))
/// };
/// let mut poller = new_poller::<i32, (), _, _, _, _>(start, query);
/// assert!(matches!(poller.poll().await, Some(PollingResult::InProgress(None))));
/// assert!(matches!(poller.poll().await, Some(PollingResult::Completed(Ok(42)))));
/// assert!(poller.poll().await.is_none());
/// # });
/// ```
pub fn new_poller<R, M, S, SF, Q, QF>(start: S, query: Q) -> impl Poller<R, M>
where
    R: DeserializeOwned,
    M: DeserializeOwned,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<OperationRecord>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<OperationRecord>> + Send + 'static,
{
    PollerImpl::new(start, query)
}

/// A [Poller] based on closures.
///
/// * `S` - starts the operation. Request parameters and options are captured
///   by the closure.
/// * `Q` - queries the status of the operation created by `start`. It receives
///   the operation name as its only parameter.
struct PollerImpl<S, Q> {
    start: Option<S>,
    query: Q,
    operation: Option<String>,
}

impl<S, Q> PollerImpl<S, Q> {
    fn new(start: S, query: Q) -> Self {
        Self {
            start: Some(start),
            query,
            operation: None,
        }
    }

    fn handle<R, M>(&mut self, result: Result<OperationRecord>) -> PollingResult<R, M>
    where
        R: DeserializeOwned,
        M: DeserializeOwned,
    {
        match result {
            Err(e) => {
                self.operation = None;
                PollingResult::Completed(Err(e))
            }
            Ok(record) => {
                let polling = operation::classify(&record);
                self.operation = match polling {
                    PollingResult::InProgress(_) => Some(record.name),
                    PollingResult::Completed(_) => None,
                };
                polling
            }
        }
    }
}

impl<R, M, S, SF, Q, QF> Poller<R, M> for PollerImpl<S, Q>
where
    R: DeserializeOwned,
    M: DeserializeOwned,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<OperationRecord>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<OperationRecord>> + Send + 'static,
{
    async fn poll(&mut self) -> Option<PollingResult<R, M>> {
        if let Some(start) = self.start.take() {
            let result = start().await;
            return Some(self.handle(result));
        }
        let name = self.operation.take()?;
        let result = (self.query)(name).await;
        Some(self.handle(result))
    }

    fn into_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>> {
        use futures::stream::unfold;
        unfold(self, |mut poller| async move {
            let polling = Poller::<R, M>::poll(&mut poller).await?;
            Some((polling, poller))
        })
    }
}
