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

use super::batch::{Batch, Contribution};
use super::descriptor::BundleDescriptor;
use super::options::BundlingOptions;
use crate::Result;
use crate::callable::ApiCallable;
use crate::error::Error;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// A request waiting to be bundled.
#[derive(Debug)]
pub(crate) struct PendingRequest<Req, Resp> {
    pub(crate) id: u64,
    pub(crate) request: Req,
    pub(crate) tx: oneshot::Sender<Result<Resp>>,
}

/// Messages sent to the [Dispatcher].
#[derive(Debug)]
pub(crate) enum ToDispatcher<Req, Resp> {
    /// Adds a request to the bundle for its key.
    Call(PendingRequest<Req, Resp>),
    /// Sends all pending bundles and waits for the results.
    Flush(oneshot::Sender<()>),
    /// Removes the elements of one caller, if they have not been sent.
    Cancel(u64),
}

/// Sent by a [BatchActor] with nothing pending, with the number of requests
/// it has received.
#[derive(Debug)]
pub(crate) struct Idle<K> {
    key: K,
    received: u64,
}

/// Messages sent to a [BatchActor].
#[derive(Debug)]
pub(crate) enum ToBatchActor<Req, Resp> {
    Call(PendingRequest<Req, Resp>),
    Flush(oneshot::Sender<()>),
    Cancel(u64),
}

/// A single request larger than the bundle limits.
#[derive(thiserror::Error, Debug)]
#[error(
    "the request has {element_count} elements and {byte_size} bytes, which exceeds the bundle limits"
)]
pub(crate) struct LimitExceeded {
    element_count: usize,
    byte_size: usize,
}

/// Routes requests to one [BatchActor] per bundle key.
#[derive(Debug)]
pub(crate) struct Dispatcher<Req, Resp, D>
where
    Resp: Clone,
    D: BundleDescriptor<Req, Resp>,
{
    callable: ApiCallable<Req, Resp>,
    descriptor: Arc<D>,
    options: BundlingOptions,
    rx: mpsc::UnboundedReceiver<ToDispatcher<Req, Resp>>,
}

/// The channel to a running [BatchActor] and the number of requests sent
/// through it.
struct ActorEntry<Req, Resp> {
    tx: mpsc::UnboundedSender<ToBatchActor<Req, Resp>>,
    sent: u64,
}

impl<Req, Resp, D> Dispatcher<Req, Resp, D>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Clone + Send + 'static,
    D: BundleDescriptor<Req, Resp>,
{
    pub(crate) fn new(
        callable: ApiCallable<Req, Resp>,
        descriptor: Arc<D>,
        options: BundlingOptions,
        rx: mpsc::UnboundedReceiver<ToDispatcher<Req, Resp>>,
    ) -> Self {
        Self {
            callable,
            descriptor,
            options,
            rx,
        }
    }

    /// Runs until every [BundlingCallable][super::BundlingCallable] is dropped.
    ///
    /// Actors with nothing pending are retired, a new actor starts with the
    /// next request for the key. Dropping the actor channels makes each actor
    /// send its pending bundle and exit. Returns the number of actors still
    /// running at that point.
    pub(crate) async fn run(mut self) -> usize {
        let mut actors: HashMap<D::Key, ActorEntry<Req, Resp>> = HashMap::new();
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<Idle<D::Key>>();
        loop {
            let msg = tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                Some(Idle { key, received }) = idle_rx.recv() => {
                    // Requests sent after the actor became idle keep it alive.
                    if actors.get(&key).is_some_and(|a| a.sent == received) {
                        tracing::debug!(?key, "retiring idle bundling actor");
                        actors.remove(&key);
                    }
                    continue;
                }
            };
            match msg {
                ToDispatcher::Call(pending) => {
                    let key = self.descriptor.key(&pending.request);
                    let mut actor = actors
                        .remove(&key)
                        .unwrap_or_else(|| self.spawn_actor(key.clone(), &idle_tx));
                    actor.sent += 1;
                    let sent = actor.tx.send(ToBatchActor::Call(pending));
                    if let Err(mpsc::error::SendError(msg)) = sent {
                        tracing::warn!(?key, "bundling actor stopped unexpectedly, restarting");
                        actor = self.spawn_actor(key.clone(), &idle_tx);
                        actor.sent += 1;
                        let _ = actor.tx.send(msg);
                    }
                    actors.insert(key, actor);
                }
                ToDispatcher::Flush(tx) => {
                    let mut flushing = JoinSet::new();
                    for actor in actors.values() {
                        let (flush_tx, flush_rx) = oneshot::channel();
                        if actor.tx.send(ToBatchActor::Flush(flush_tx)).is_ok() {
                            flushing.spawn(flush_rx);
                        }
                    }
                    flushing.join_all().await;
                    let _ = tx.send(());
                }
                ToDispatcher::Cancel(id) => {
                    for actor in actors.values() {
                        let _ = actor.tx.send(ToBatchActor::Cancel(id));
                    }
                }
            }
        }
        tracing::debug!(keys = actors.len(), "bundling dispatcher stopped");
        actors.len()
    }

    fn spawn_actor(
        &self,
        key: D::Key,
        idle: &mpsc::UnboundedSender<Idle<D::Key>>,
    ) -> ActorEntry<Req, Resp> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            BatchActor::new(
                key,
                self.callable.clone(),
                self.descriptor.clone(),
                self.options.clone(),
                rx,
                idle.clone(),
            )
            .run(),
        );
        ActorEntry { tx, sent: 0 }
    }
}

/// Accumulates the bundle for one key and sends it when a threshold is met.
#[derive(Debug)]
pub(crate) struct BatchActor<Req, Resp, D>
where
    Resp: Clone,
    D: BundleDescriptor<Req, Resp>,
{
    key: D::Key,
    callable: ApiCallable<Req, Resp>,
    descriptor: Arc<D>,
    options: BundlingOptions,
    rx: mpsc::UnboundedReceiver<ToBatchActor<Req, Resp>>,
    idle: mpsc::UnboundedSender<Idle<D::Key>>,
    batch: Batch<Req, Resp, D::Element>,
    deadline: Option<Instant>,
    inflight: JoinSet<()>,
    received: u64,
    reported: Option<u64>,
}

impl<Req, Resp, D> BatchActor<Req, Resp, D>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Clone + Send + 'static,
    D: BundleDescriptor<Req, Resp>,
{
    pub(crate) fn new(
        key: D::Key,
        callable: ApiCallable<Req, Resp>,
        descriptor: Arc<D>,
        options: BundlingOptions,
        rx: mpsc::UnboundedReceiver<ToBatchActor<Req, Resp>>,
        idle: mpsc::UnboundedSender<Idle<D::Key>>,
    ) -> Self {
        Self {
            key,
            callable,
            descriptor,
            options,
            rx,
            idle,
            batch: Batch::new(),
            deadline: None,
            inflight: JoinSet::new(),
            received: 0,
            reported: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let timer = tokio::time::sleep_until(self.deadline.unwrap_or_else(Instant::now));
            tokio::select! {
                _ = self.inflight.join_next(), if !self.inflight.is_empty() => {},
                _ = timer, if self.deadline.is_some() => {
                    self.flush();
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(ToBatchActor::Call(pending)) => {
                            self.received += 1;
                            self.add(pending);
                        }
                        Some(ToBatchActor::Flush(tx)) => {
                            self.flush();
                            std::mem::take(&mut self.inflight).join_all().await;
                            let _ = tx.send(());
                        }
                        Some(ToBatchActor::Cancel(id)) => {
                            if self.batch.remove(id) && self.batch.is_empty() {
                                self.deadline = None;
                            }
                        }
                        None => {
                            self.flush();
                            std::mem::take(&mut self.inflight).join_all().await;
                            break;
                        }
                    }
                }
            }
            self.report_if_idle();
        }
    }

    /// Tells the dispatcher, once per idle period, that nothing is pending.
    fn report_if_idle(&mut self) {
        if !self.batch.is_empty()
            || !self.inflight.is_empty()
            || self.reported == Some(self.received)
        {
            return;
        }
        self.reported = Some(self.received);
        let _ = self.idle.send(Idle {
            key: self.key.clone(),
            received: self.received,
        });
    }

    fn add(&mut self, pending: PendingRequest<Req, Resp>) {
        let (template, elements) = self.descriptor.split(pending.request);
        let byte_size = elements
            .iter()
            .map(|e| self.descriptor.element_size(e))
            .sum::<usize>();
        let element_count = elements.len();
        if self.options.exceeds_limits(element_count, byte_size) {
            let _ = pending.tx.send(Err(Error::ser(LimitExceeded {
                element_count,
                byte_size,
            })));
            return;
        }
        if self.options.exceeds_limits(
            self.batch.element_count() + element_count,
            self.batch.byte_size() + byte_size,
        ) {
            self.flush();
        }
        if self.batch.is_empty() {
            self.deadline = Some(Instant::now() + self.options.delay_threshold());
        }
        self.batch.push(Contribution {
            id: pending.id,
            template,
            elements,
            byte_size,
            tx: pending.tx,
        });
        if self
            .options
            .at_threshold(self.batch.element_count(), self.batch.byte_size())
        {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.deadline = None;
        if self.batch.is_empty() {
            return;
        }
        let batch = self.batch.take();
        tracing::debug!(
            key = ?self.key,
            element_count = batch.element_count(),
            byte_size = batch.byte_size(),
            "sending bundle"
        );
        self.inflight
            .spawn(batch.send(self.callable.clone(), self.descriptor.clone()));
    }
}
