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

use crate::operation::OperationRecord;
use gax::Result;
use gax::callable::{ApiCallable, build_callable};
use gax::options::CallOptions;
use gax::transport::{JsonCall, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The RPCs used to manage long-running operations.
///
/// Implemented by [OperationsClient]. Tests and services with a different
/// operations API provide their own implementation.
#[async_trait::async_trait]
pub trait OperationsStub: std::fmt::Debug + Send + Sync {
    /// Fetches the latest state of an operation.
    async fn get_operation(&self, name: String, options: CallOptions) -> Result<OperationRecord>;

    /// Starts cancelling an operation.
    async fn cancel_operation(&self, name: String, options: CallOptions) -> Result<()>;

    /// Deletes an operation record.
    async fn delete_operation(&self, name: String, options: CallOptions) -> Result<()>;
}

/// The request to fetch an operation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct GetOperationRequest {
    pub name: String,
}

/// The request to cancel an operation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct CancelOperationRequest {
    pub name: String,
}

/// The request to delete an operation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct DeleteOperationRequest {
    pub name: String,
}

/// The response of methods without a payload.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Empty {}

const GET_OPERATION: &str = "google.longrunning.Operations/GetOperation";
const CANCEL_OPERATION: &str = "google.longrunning.Operations/CancelOperation";
const DELETE_OPERATION: &str = "google.longrunning.Operations/DeleteOperation";

/// Implements [OperationsStub] with one [ApiCallable] per RPC.
///
/// Each callable applies its own retry settings, so polling recovers from
/// transient failures.
#[derive(Clone, Debug)]
pub struct OperationsClient {
    get: ApiCallable<GetOperationRequest, OperationRecord>,
    cancel: ApiCallable<CancelOperationRequest, Empty>,
    delete: ApiCallable<DeleteOperationRequest, Empty>,
}

impl OperationsClient {
    /// Creates a client from existing callables.
    pub fn new(
        get: ApiCallable<GetOperationRequest, OperationRecord>,
        cancel: ApiCallable<CancelOperationRequest, Empty>,
        delete: ApiCallable<DeleteOperationRequest, Empty>,
    ) -> Self {
        Self {
            get,
            cancel,
            delete,
        }
    }

    /// Creates a client sending JSON payloads over `transport`.
    ///
    /// `defaults` apply to all three RPCs.
    pub fn from_transport(transport: Arc<dyn Transport>, defaults: CallOptions) -> Self {
        Self::new(
            build_callable(
                JsonCall::new(transport.clone(), GET_OPERATION),
                defaults.clone(),
            ),
            build_callable(
                JsonCall::new(transport.clone(), CANCEL_OPERATION),
                defaults.clone(),
            ),
            build_callable(JsonCall::new(transport, DELETE_OPERATION), defaults),
        )
    }
}

#[async_trait::async_trait]
impl OperationsStub for OperationsClient {
    async fn get_operation(&self, name: String, options: CallOptions) -> Result<OperationRecord> {
        self.get.call(GetOperationRequest { name }, options).await
    }

    async fn cancel_operation(&self, name: String, options: CallOptions) -> Result<()> {
        self.cancel
            .call(CancelOperationRequest { name }, options)
            .await
            .map(|_| ())
    }

    async fn delete_operation(&self, name: String, options: CallOptions) -> Result<()> {
        self.delete
            .call(DeleteOperationRequest { name }, options)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mockall::mock! {
    #[derive(Debug)]
    pub OperationsStub {}
    #[async_trait::async_trait]
    impl OperationsStub for OperationsStub {
        async fn get_operation(&self, name: String, options: CallOptions) -> Result<OperationRecord>;
        async fn cancel_operation(&self, name: String, options: CallOptions) -> Result<()>;
        async fn delete_operation(&self, name: String, options: CallOptions) -> Result<()>;
    }
}
