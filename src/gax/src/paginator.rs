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

//! Streams over paginated list RPCs.
//!
//! List RPCs as defined by [AIP-4233] return one page of items and a token
//! for the next page. An empty token means there are no more pages. The
//! [PageableRequest] and [PageableResponse] traits describe where the token
//! and the items live in the messages of a method, and [ApiCallable::paged]
//! turns a callable for such a method into a [PagedCallable].
//!
//! [AIP-4233]: https://google.aip.dev/client-libraries/4233

use crate::Result;
use crate::callable::ApiCallable;
use crate::error::Error;
use crate::options::CallOptions;
use futures::stream::unfold;
use futures::{Stream, StreamExt};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;

/// A request for a list RPC.
pub trait PageableRequest: Clone {
    /// Sets the token of the page to fetch.
    fn set_page_token(&mut self, token: String);
}

/// A response for a list RPC.
pub trait PageableResponse {
    /// The type of items in each page.
    type Item;

    /// The token for the next page, empty if this is the last page.
    fn next_page_token(&self) -> String;

    /// Consumes the page and returns its items, in response order.
    fn into_items(self) -> Vec<Self::Item>;
}

/// A stream of pages from a list RPC.
///
/// The stream is lazy: no request is made until the first page is polled. It
/// ends after the first page with an empty next page token, or after the
/// first error.
#[pin_project]
pub struct Paginator<T, E> {
    #[pin]
    stream: Pin<Box<dyn Stream<Item = std::result::Result<T, E>> + Send>>,
}

// `Continue(None)` fetches the first page with the original request.
type ControlFlow = std::ops::ControlFlow<(), Option<String>>;

impl<T, E> Paginator<T, E>
where
    T: PageableResponse + Send + 'static,
    E: Send + 'static,
{
    /// Creates a new [Paginator] given a function to fetch a page.
    ///
    /// `execute` receives `None` for the first page, and the token returned
    /// by the previous page otherwise.
    pub fn new<F>(execute: impl Fn(Option<String>) -> F + Clone + Send + 'static) -> Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let stream = unfold(ControlFlow::Continue(None), move |state| {
            let execute = execute.clone();
            async move {
                let token = match state {
                    ControlFlow::Continue(token) => token,
                    ControlFlow::Break(_) => return None,
                };
                match execute(token).await {
                    Ok(page) => {
                        let tok = page.next_page_token();
                        let next_state = if tok.is_empty() {
                            ControlFlow::Break(())
                        } else {
                            ControlFlow::Continue(Some(tok))
                        };
                        Some((Ok(page), next_state))
                    }
                    Err(e) => Some((Err(e), ControlFlow::Break(()))),
                }
            }
        });
        Self {
            stream: Box::pin(stream.fuse()),
        }
    }

    /// Converts the stream of pages into a stream of items.
    pub fn items(self) -> ItemPaginator<T::Item, E>
    where
        T::Item: Send + 'static,
    {
        let stream = self.stream.flat_map(|page| {
            let items = match page {
                Ok(p) => p.into_items().into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(items)
        });
        ItemPaginator {
            stream: Box::pin(stream),
        }
    }
}

impl<T, E> Paginator<T, E> {
    /// Returns the next page of the wrapped stream.
    pub fn next(&mut self) -> futures::stream::Next<'_, Self> {
        StreamExt::next(self)
    }
}

impl<T, E> Stream for Paginator<T, E> {
    type Item = std::result::Result<T, E>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }
}

/// A stream of items from a list RPC, fetching pages as needed.
///
/// A failure to fetch a page is returned as the last element of the stream.
/// Items returned before the failure remain valid.
#[pin_project]
pub struct ItemPaginator<I, E> {
    #[pin]
    stream: Pin<Box<dyn Stream<Item = std::result::Result<I, E>> + Send>>,
}

impl<I, E> ItemPaginator<I, E> {
    /// Returns the next item of the wrapped stream.
    pub fn next(&mut self) -> futures::stream::Next<'_, Self> {
        StreamExt::next(self)
    }
}

impl<I, E> Stream for ItemPaginator<I, E> {
    type Item = std::result::Result<I, E>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }
}

impl<Req, Resp> ApiCallable<Req, Resp>
where
    Req: PageableRequest + Send + Sync + 'static,
    Resp: PageableResponse + Send + 'static,
{
    /// Attaches the page descriptor of a list RPC.
    pub fn paged(self) -> PagedCallable<Req, Resp> {
        PagedCallable { inner: self }
    }
}

/// A callable for list RPCs, see [ApiCallable::paged].
#[derive(Debug)]
pub struct PagedCallable<Req, Resp> {
    inner: ApiCallable<Req, Resp>,
}

impl<Req, Resp> Clone for PagedCallable<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req, Resp> PagedCallable<Req, Resp>
where
    Req: PageableRequest + Send + Sync + 'static,
    Resp: PageableResponse + Send + 'static,
    Resp::Item: Send + 'static,
{
    /// Prepares a paginated call. No request is made until a page is polled.
    pub fn call(&self, req: Req, options: CallOptions) -> PagedResponse<Req, Resp> {
        PagedResponse {
            callable: self.inner.clone(),
            request: req,
            options,
        }
    }

    /// Fetches a single page, using the request as-is.
    pub async fn call_page(&self, req: Req, options: CallOptions) -> Result<Resp> {
        self.inner.call(req, options).await
    }
}

/// The result of a paginated call.
///
/// Each call to [pages][Self::pages] or [items][Self::items] starts a new
/// traversal from the original request.
#[derive(Debug)]
pub struct PagedResponse<Req, Resp> {
    callable: ApiCallable<Req, Resp>,
    request: Req,
    options: CallOptions,
}

impl<Req: Clone, Resp> Clone for PagedResponse<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            callable: self.callable.clone(),
            request: self.request.clone(),
            options: self.options.clone(),
        }
    }
}

impl<Req, Resp> PagedResponse<Req, Resp>
where
    Req: PageableRequest + Send + Sync + 'static,
    Resp: PageableResponse + Send + 'static,
    Resp::Item: Send + 'static,
{
    /// The original request.
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// A lazy stream of pages.
    pub fn pages(&self) -> Paginator<Resp, Error> {
        let callable = self.callable.clone();
        let request = self.request.clone();
        let options = self.options.clone();
        let execute = move |token: Option<String>| {
            let callable = callable.clone();
            let mut request = request.clone();
            if let Some(t) = token {
                request.set_page_token(t);
            }
            let options = options.clone();
            async move { callable.call(request, options).await }
        };
        Paginator::new(execute)
    }

    /// A lazy stream of items across all pages.
    pub fn items(&self) -> ItemPaginator<Resp::Item, Error> {
        self.pages().items()
    }
}
