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

use std::time::Duration;

/// Options configuring when bundles are sent.
///
/// A bundle is sent when any threshold is reached: the number of elements,
/// the total size of the elements, or the time since the first element was
/// added. The limits bound the size of a single bundle.
///
/// To turn off bundling, set the element count threshold to 1.
///
/// # Example
/// ```
/// # use gax::bundling::BundlingOptions;
/// use std::time::Duration;
/// let options = BundlingOptions::new()
///     .set_element_count_threshold(10_u32)
///     .set_request_byte_threshold(1024_usize)
///     .set_delay_threshold(Duration::from_millis(50))
///     .set_element_count_limit(1000_u32);
/// assert_eq!(options.element_count_threshold(), 10);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct BundlingOptions {
    element_count_threshold: u32,
    request_byte_threshold: usize,
    delay_threshold: Duration,
    element_count_limit: Option<u32>,
    request_byte_limit: Option<usize>,
}

impl BundlingOptions {
    /// Creates options with the default thresholds and no limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the bundle once it holds this many elements.
    pub fn set_element_count_threshold<V: Into<u32>>(mut self, v: V) -> Self {
        self.element_count_threshold = v.into();
        self
    }

    /// Sends the bundle once its elements add up to this many bytes.
    pub fn set_request_byte_threshold<V: Into<usize>>(mut self, v: V) -> Self {
        self.request_byte_threshold = v.into();
        self
    }

    /// Sends the bundle this long after its first element was added.
    pub fn set_delay_threshold<V: Into<Duration>>(mut self, v: V) -> Self {
        self.delay_threshold = v.into();
        self
    }

    /// Never sends more than this many elements in one bundle.
    pub fn set_element_count_limit<V: Into<u32>>(mut self, v: V) -> Self {
        self.element_count_limit = Some(v.into());
        self
    }

    /// Never sends more than this many bytes of elements in one bundle.
    pub fn set_request_byte_limit<V: Into<usize>>(mut self, v: V) -> Self {
        self.request_byte_limit = Some(v.into());
        self
    }

    /// The element count threshold.
    pub fn element_count_threshold(&self) -> u32 {
        self.element_count_threshold
    }

    /// The byte size threshold.
    pub fn request_byte_threshold(&self) -> usize {
        self.request_byte_threshold
    }

    /// The delay threshold.
    pub fn delay_threshold(&self) -> Duration {
        self.delay_threshold
    }

    /// The element count limit, if any.
    pub fn element_count_limit(&self) -> Option<u32> {
        self.element_count_limit
    }

    /// The byte size limit, if any.
    pub fn request_byte_limit(&self) -> Option<usize> {
        self.request_byte_limit
    }

    pub(crate) fn at_threshold(&self, element_count: usize, byte_size: usize) -> bool {
        element_count >= self.element_count_threshold as usize
            || byte_size >= self.request_byte_threshold
    }

    pub(crate) fn exceeds_limits(&self, element_count: usize, byte_size: usize) -> bool {
        self.element_count_limit
            .is_some_and(|l| element_count > l as usize)
            || self.request_byte_limit.is_some_and(|l| byte_size > l)
    }
}

impl std::default::Default for BundlingOptions {
    fn default() -> Self {
        Self {
            element_count_threshold: 100_u32,
            request_byte_threshold: 1024 * 1024,
            delay_threshold: Duration::from_millis(10),
            element_count_limit: None,
            request_byte_limit: None,
        }
    }
}
