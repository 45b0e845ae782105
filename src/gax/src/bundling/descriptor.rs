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

use std::ops::Range;

/// Describes how requests of a method are bundled.
///
/// Each request carries a repeated field with the elements to bundle, for
/// example the messages of a publish request. Requests with the same
/// [key][Self::key] are merged by concatenating their elements in arrival
/// order. The response is then split back, giving each caller the part of the
/// response that corresponds to its elements.
///
/// # Example
/// ```
/// # use gax::bundling::BundleDescriptor;
/// # use std::ops::Range;
/// #[derive(Clone, Debug)]
/// struct PublishRequest { topic: String, messages: Vec<String> }
/// #[derive(Clone, Debug)]
/// struct PublishResponse { message_ids: Vec<String> }
///
/// struct PublishDescriptor;
/// impl BundleDescriptor<PublishRequest, PublishResponse> for PublishDescriptor {
///     type Key = String;
///     type Element = String;
///     fn key(&self, req: &PublishRequest) -> String {
///         req.topic.clone()
///     }
///     fn split(&self, mut req: PublishRequest) -> (PublishRequest, Vec<String>) {
///         let messages = std::mem::take(&mut req.messages);
///         (req, messages)
///     }
///     fn merge(&self, mut template: PublishRequest, elements: Vec<String>) -> PublishRequest {
///         template.messages = elements;
///         template
///     }
///     fn element_size(&self, element: &String) -> usize {
///         element.len()
///     }
///     fn slice_response(&self, response: &PublishResponse, range: Range<usize>) -> PublishResponse {
///         let message_ids = response.message_ids.get(range).unwrap_or_default().to_vec();
///         PublishResponse { message_ids }
///     }
/// }
/// ```
pub trait BundleDescriptor<Req, Resp: Clone>: Send + Sync + 'static {
    /// The discriminator: requests bundle together only if their keys are
    /// equal.
    type Key: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static;

    /// The type of the bundled elements.
    type Element: Send + 'static;

    /// Computes the discriminator for a request.
    fn key(&self, req: &Req) -> Self::Key;

    /// Removes the elements from a request.
    ///
    /// Returns the remaining request, used as a template for the merged
    /// request, and the elements in request order.
    fn split(&self, req: Req) -> (Req, Vec<Self::Element>);

    /// Creates the merged request from a template and the concatenated
    /// elements.
    fn merge(&self, template: Req, elements: Vec<Self::Element>) -> Req;

    /// The size of one element, compared against the byte thresholds.
    fn element_size(&self, element: &Self::Element) -> usize;

    /// Extracts the part of the response for one caller.
    ///
    /// `range` holds the positions of the caller's elements in the merged
    /// request. Methods without a per-element response field keep the default,
    /// where every caller receives a copy of the whole response.
    fn slice_response(&self, response: &Resp, range: Range<usize>) -> Resp {
        let _ = range;
        response.clone()
    }
}
