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

use super::descriptor::BundleDescriptor;
use crate::Result;
use crate::callable::ApiCallable;
use crate::options::CallOptions;
use std::sync::Arc;
use tokio::sync::oneshot;

/// The elements contributed by one caller.
#[derive(Debug)]
pub(crate) struct Contribution<Req, Resp, E> {
    pub(crate) id: u64,
    pub(crate) template: Req,
    pub(crate) elements: Vec<E>,
    pub(crate) byte_size: usize,
    pub(crate) tx: oneshot::Sender<Result<Resp>>,
}

/// The pending bundle for one key.
#[derive(Debug)]
pub(crate) struct Batch<Req, Resp, E> {
    contributions: Vec<Contribution<Req, Resp, E>>,
    element_count: usize,
    byte_size: usize,
}

impl<Req, Resp, E> Batch<Req, Resp, E> {
    pub(crate) fn new() -> Self {
        Self {
            contributions: Vec::new(),
            element_count: 0,
            byte_size: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    pub(crate) fn element_count(&self) -> usize {
        self.element_count
    }

    pub(crate) fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub(crate) fn push(&mut self, contribution: Contribution<Req, Resp, E>) {
        self.element_count += contribution.elements.len();
        self.byte_size += contribution.byte_size;
        self.contributions.push(contribution);
    }

    /// Removes the contribution of one caller, returns `true` if it was found.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let Some(pos) = self.contributions.iter().position(|c| c.id == id) else {
            return false;
        };
        let removed = self.contributions.remove(pos);
        self.element_count -= removed.elements.len();
        self.byte_size -= removed.byte_size;
        true
    }

    /// Moves the contents into a new batch, leaving this one empty.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::replace(self, Self::new())
    }

    /// Sends the merged request and delivers each caller's part of the result.
    ///
    /// The merged request uses the first caller's request as its template.
    pub(crate) async fn send<D>(self, callable: ApiCallable<Req, Resp>, descriptor: Arc<D>)
    where
        Req: Clone + Send + Sync + 'static,
        Resp: Clone + Send + 'static,
        D: BundleDescriptor<Req, Resp, Element = E>,
    {
        let mut contributions = self.contributions.into_iter();
        let Some(first) = contributions.next() else {
            return;
        };
        let template = first.template;
        let mut elements = first.elements;
        let mut receivers = vec![(0..elements.len(), first.tx)];
        for c in contributions {
            let start = elements.len();
            elements.extend(c.elements);
            receivers.push((start..elements.len(), c.tx));
        }
        let request = descriptor.merge(template, elements);
        match callable.call(request, CallOptions::new()).await {
            Ok(response) => {
                for (range, tx) in receivers {
                    // The caller may have stopped waiting.
                    let _ = tx.send(Ok(descriptor.slice_response(&response, range)));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, callers = receivers.len(), "bundle failed");
                for (_, tx) in receivers {
                    let _ = tx.send(Err(e.clone()));
                }
            }
        }
    }
}
