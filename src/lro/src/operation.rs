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

use crate::PollingResult;
use crate::client::OperationsStub;
use crate::wait::WaitOptions;
use gax::Result;
use gax::error::Error;
use gax::error::rpc::Status;
use gax::options::CallOptions;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// The outcome of a completed operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationResult {
    /// The operation succeeded, with this response.
    Response(serde_json::Value),
    /// The operation failed.
    Error(Status),
}

/// The operation record returned by the service.
///
/// In JSON the result is stored in either the `response` or the `error`
/// field.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(from = "WireOperation", into = "WireOperation")]
pub struct OperationRecord {
    /// The server-assigned name of the operation.
    pub name: String,
    /// If `true`, the operation completed and `result` is set.
    pub done: bool,
    /// Service-specific progress information.
    pub metadata: Option<serde_json::Value>,
    /// The outcome, set once the operation is done.
    pub result: Option<OperationResult>,
}

impl OperationRecord {
    /// Creates a record for an operation still in progress.
    pub fn new<V: Into<String>>(name: V) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the metadata.
    pub fn set_metadata<V: Into<serde_json::Value>>(mut self, v: V) -> Self {
        self.metadata = Some(v.into());
        self
    }

    /// Marks the operation as done with a successful response.
    pub fn set_response<V: Into<serde_json::Value>>(mut self, v: V) -> Self {
        self.done = true;
        self.result = Some(OperationResult::Response(v.into()));
        self
    }

    /// Marks the operation as done with an error.
    pub fn set_error(mut self, v: Status) -> Self {
        self.done = true;
        self.result = Some(OperationResult::Error(v));
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
struct WireOperation {
    name: String,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Status>,
}

impl From<WireOperation> for OperationRecord {
    fn from(value: WireOperation) -> Self {
        let result = match (value.error, value.response) {
            (Some(e), _) => Some(OperationResult::Error(e)),
            (None, Some(r)) => Some(OperationResult::Response(r)),
            (None, None) => None,
        };
        Self {
            name: value.name,
            done: value.done,
            metadata: value.metadata,
            result,
        }
    }
}

impl From<OperationRecord> for WireOperation {
    fn from(value: OperationRecord) -> Self {
        let (response, error) = match value.result {
            Some(OperationResult::Response(r)) => (Some(r), None),
            Some(OperationResult::Error(e)) => (None, Some(e)),
            None => (None, None),
        };
        Self {
            name: value.name,
            done: value.done,
            metadata: value.metadata,
            response,
            error,
        }
    }
}

pub(crate) fn decode_metadata<M: DeserializeOwned>(record: &OperationRecord) -> Result<Option<M>> {
    record
        .metadata
        .clone()
        .map(serde_json::from_value::<M>)
        .transpose()
        .map_err(Error::deser)
}

/// The final result of a completed operation.
pub(crate) fn decode_result<R: DeserializeOwned>(record: &OperationRecord) -> Result<R> {
    match &record.result {
        Some(OperationResult::Response(r)) => {
            serde_json::from_value::<R>(r.clone()).map_err(Error::deser)
        }
        Some(OperationResult::Error(status)) => Err(Error::service(status.clone())),
        None => Err(Error::deser(format!(
            "operation {} is done but has neither a response nor an error",
            record.name
        ))),
    }
}

pub(crate) fn classify<R, M>(record: &OperationRecord) -> PollingResult<R, M>
where
    R: DeserializeOwned,
    M: DeserializeOwned,
{
    if record.done {
        return PollingResult::Completed(decode_result(record));
    }
    // Metadata is informational, a payload that does not decode is skipped.
    PollingResult::InProgress(decode_metadata(record).ok().flatten())
}

type DoneCallback<R, M> = Box<dyn FnOnce(&Operation<R, M>) + Send>;

/// A long-running operation with a typed response and metadata.
///
/// # Parameters
/// * `R` - the response type, returned when the operation completes
///   successfully.
/// * `M` - the metadata type, reported while the operation is in progress.
///
/// # Example
/// ```
/// # use lro::{Operation, WaitOptions};
/// # use serde::Deserialize;
/// #[derive(Debug, Deserialize)]
/// struct Database { name: String }
/// #[derive(Debug, Deserialize)]
/// struct Progress { percent: u32 }
///
/// async fn create(mut op: Operation<Database, Progress>) -> gax::Result<Database> {
///     op.on_done(|op| println!("{} finished", op.name()));
///     op.wait_until_done(WaitOptions::new()).await
/// }
/// ```
pub struct Operation<R, M> {
    record: OperationRecord,
    stub: Arc<dyn OperationsStub>,
    callbacks: Vec<DoneCallback<R, M>>,
    _phantom: PhantomData<fn() -> (R, M)>,
}

impl<R, M> std::fmt::Debug for Operation<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("record", &self.record)
            .field("stub", &self.stub)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl<R, M> Operation<R, M>
where
    R: DeserializeOwned,
    M: DeserializeOwned,
{
    /// Wraps the record returned by the method that started the operation.
    pub fn new(record: OperationRecord, stub: Arc<dyn OperationsStub>) -> Self {
        Self {
            record,
            stub,
            callbacks: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// The name of the operation.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Returns `true` if the operation completed, successfully or not.
    pub fn done(&self) -> bool {
        self.record.done
    }

    /// The most recently fetched record.
    pub fn record(&self) -> &OperationRecord {
        &self.record
    }

    /// The error, if the operation failed.
    pub fn error(&self) -> Option<&Status> {
        match &self.record.result {
            Some(OperationResult::Error(status)) => Some(status),
            _ => None,
        }
    }

    /// Returns `true` if the operation failed.
    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    /// The response, if the operation succeeded.
    ///
    /// Fails if the response does not decode as `R`.
    pub fn response(&self) -> Result<Option<R>> {
        match &self.record.result {
            Some(OperationResult::Response(r)) => serde_json::from_value::<R>(r.clone())
                .map(Some)
                .map_err(Error::deser),
            _ => Ok(None),
        }
    }

    /// Returns `true` if the operation succeeded.
    pub fn is_response(&self) -> bool {
        matches!(self.record.result, Some(OperationResult::Response(_)))
    }

    /// The metadata, if the service reported any.
    ///
    /// Fails if the metadata does not decode as `M`.
    pub fn metadata(&self) -> Result<Option<M>> {
        decode_metadata(&self.record)
    }

    /// Registers a callback to run once the operation is done.
    ///
    /// Callbacks run in registration order, the first time a reload observes
    /// the operation as done. If the operation is already done the callback
    /// runs immediately.
    pub fn on_done<F>(&mut self, callback: F)
    where
        F: FnOnce(&Operation<R, M>) + Send + 'static,
    {
        if self.done() {
            callback(self);
            return;
        }
        self.callbacks.push(Box::new(callback));
    }

    /// Fetches the latest state of the operation.
    pub async fn reload(&mut self, options: CallOptions) -> Result<()> {
        let record = self
            .stub
            .get_operation(self.record.name.clone(), options)
            .await?;
        tracing::debug!(name = %record.name, done = record.done, "polled operation");
        self.record = record;
        if self.done() {
            let callbacks = std::mem::take(&mut self.callbacks);
            for callback in callbacks {
                callback(self);
            }
        }
        Ok(())
    }

    /// Reloads the operation and reports its state.
    ///
    /// A failure to reload is reported as a completed operation with the
    /// error. The polling RPC already retries transient failures.
    pub async fn poll(&mut self, options: CallOptions) -> PollingResult<R, M> {
        if let Err(e) = self.reload(options).await {
            return PollingResult::Completed(Err(e));
        }
        classify(&self.record)
    }

    /// Starts cancelling the operation.
    ///
    /// The service may complete the operation anyway. Reload it to find out
    /// the final state.
    pub async fn cancel(&self, options: CallOptions) -> Result<()> {
        self.stub
            .cancel_operation(self.record.name.clone(), options)
            .await
    }

    /// Deletes the operation record from the service.
    pub async fn delete(&self, options: CallOptions) -> Result<()> {
        self.stub
            .delete_operation(self.record.name.clone(), options)
            .await
    }

    /// Polls the operation until it completes and returns its result.
    ///
    /// Waits between polls as scheduled by the backoff in `options`. Fails
    /// with `DEADLINE_EXCEEDED` if the operation is not done before the
    /// timeout, and with `CANCELLED` if the cancellation token fires. Both
    /// apply to the polls as well as to the waits between them.
    pub async fn wait_until_done(&mut self, options: WaitOptions) -> Result<R> {
        let deadline = tokio::time::Instant::now() + options.timeout();
        let name = self.record.name.clone();
        let polling = tokio::time::timeout_at(deadline, self.poll_until_done(&options));
        let result = match options.cancellation() {
            None => polling.await,
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::cancelled()),
                r = polling => r,
            },
        };
        result.unwrap_or_else(|_| {
            Err(Error::timeout(format!(
                "operation {name} was not done after {:?}",
                options.timeout()
            )))
        })
    }

    async fn poll_until_done(&mut self, options: &WaitOptions) -> Result<R> {
        let loop_start = std::time::Instant::now();
        let mut attempt_count = 0_u32;
        while !self.done() {
            attempt_count += 1;
            let delay = options.backoff().wait_period(loop_start, attempt_count);
            tracing::debug!(
                name = %self.record.name,
                attempt_count,
                ?delay,
                "waiting for operation"
            );
            tokio::time::sleep(delay).await;
            self.reload(options.call_options().clone()).await?;
        }
        decode_result(&self.record)
    }

    /// Polls the operation every `poll_interval` until it completes.
    ///
    /// Fails with `DEADLINE_EXCEEDED` if the operation is not done before
    /// `timeout`.
    pub async fn wait(
        &mut self,
        poll_interval: std::time::Duration,
        timeout: std::time::Duration,
    ) -> Result<R> {
        let options = WaitOptions::new()
            .set_backoff(gax::polling_backoff_policy::FixedInterval(poll_interval))
            .set_timeout(timeout);
        self.wait_until_done(options).await
    }
}
