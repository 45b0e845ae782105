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

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{Subscriber, field, span};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// A span recorded by [CaptureLayer].
#[derive(Clone, Debug)]
pub struct CapturedSpan {
    /// The span id, unique while the span is open.
    pub id: span::Id,
    /// The span name.
    pub name: String,
    /// The span fields formatted as strings.
    ///
    /// String fields are stored without quotes. Fields recorded after the
    /// span was created are included.
    pub fields: BTreeMap<String, String>,
}

struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

/// A layer recording every span and its fields.
///
/// Clones share the same records, so a test keeps one clone to inspect the
/// spans and installs the other in a subscriber.
///
/// # Example
/// ```
/// use gapic_test_utils::capture::CaptureLayer;
/// use tracing_subscriber::prelude::*;
///
/// let capture = CaptureLayer::new();
/// let subscriber = tracing_subscriber::registry().with(capture.clone());
/// tracing::subscriber::with_default(subscriber, || {
///     let span = tracing::info_span!("work", attempts = tracing::field::Empty);
///     span.record("attempts", 3_u64);
/// });
/// let spans = capture.spans();
/// assert_eq!(spans[0].name, "work");
/// assert_eq!(spans[0].fields.get("attempts").map(String::as_str), Some("3"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CaptureLayer {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

impl CaptureLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The spans recorded so far, in creation order.
    pub fn spans(&self) -> Vec<CapturedSpan> {
        self.spans.lock().expect("capture log is not poisoned").clone()
    }

    /// Forgets all recorded spans.
    pub fn clear(&self) {
        self.spans.lock().expect("capture log is not poisoned").clear();
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        let captured = CapturedSpan {
            id: id.clone(),
            name: attrs.metadata().name().to_string(),
            fields,
        };
        self.spans
            .lock()
            .expect("capture log is not poisoned")
            .push(captured);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        let mut spans = self.spans.lock().expect("capture log is not poisoned");
        // Ids are reused after a span closes, the most recent span wins.
        if let Some(captured) = spans.iter_mut().rev().find(|s| s.id == *id) {
            values.record(&mut FieldVisitor(&mut captured.fields));
        }
    }
}
