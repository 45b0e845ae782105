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

//! Loads the JSON client configuration shipped with generated clients.
//!
//! The configuration names sets of retryable codes and backoff parameters and
//! assigns them, with a timeout and optional bundling thresholds, to each
//! method of a service:
//!
//! ```
//! # use gax::client_config::ServiceConfig;
//! # use std::time::Duration;
//! let json = r#"{"interfaces": {"google.pubsub.v1.Publisher": {
//!     "retry_codes": {"idempotent": ["UNAVAILABLE", "DEADLINE_EXCEEDED"]},
//!     "retry_params": {"default": {
//!         "initial_retry_delay_millis": 100, "retry_delay_multiplier": 1.3,
//!         "max_retry_delay_millis": 60000, "total_timeout_millis": 600000}},
//!     "methods": {"Publish": {
//!         "timeout_millis": 60000,
//!         "retry_codes_name": "idempotent", "retry_params_name": "default",
//!         "bundling": {"element_count_threshold": 10, "delay_threshold_millis": 5}}}
//! }}}"#;
//! let config = ServiceConfig::from_json(json, "google.pubsub.v1.Publisher", Duration::from_secs(30))?;
//! let options = config.method_options("Publish");
//! assert_eq!(options.timeout(), Some(Duration::from_secs(60)));
//! assert!(options.retry_settings().is_some());
//! # Ok::<(), gax::client_config::Error>(())
//! ```

use crate::bundling::BundlingOptions;
use crate::error::rpc::Code;
use crate::exponential_backoff;
use crate::options::CallOptions;
use crate::retry_settings::RetrySettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Errors found while loading a client configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("cannot parse the client configuration: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("the client configuration has no interface named `{0}`")]
    MissingInterface(String),
    #[error("unknown status code `{code}` in retry codes `{name}`")]
    UnknownCode { name: String, code: String },
    #[error("method `{method}` references undefined retry codes `{name}`")]
    MissingRetryCodes { method: String, name: String },
    #[error("method `{method}` references undefined retry params `{name}`")]
    MissingRetryParams { method: String, name: String },
    #[error("invalid retry params `{name}`: {source}")]
    InvalidRetryParams {
        name: String,
        #[source]
        source: exponential_backoff::Error,
    },
}

/// The defaults for one method.
#[derive(Clone, Debug, Default)]
pub struct MethodConfig {
    options: CallOptions,
    bundling: Option<BundlingOptions>,
}

impl MethodConfig {
    /// The method's call options, without the service defaults.
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// The bundling thresholds, for methods that support bundling.
    pub fn bundling(&self) -> Option<&BundlingOptions> {
        self.bundling.as_ref()
    }
}

/// The resolved configuration for one service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    service_name: String,
    defaults: CallOptions,
    methods: BTreeMap<String, MethodConfig>,
    raw: RawInterface,
}

impl ServiceConfig {
    /// Loads the configuration for `service_name` from `json`.
    ///
    /// `default_timeout` applies to every method without a `timeout_millis`.
    /// All references between sections are checked here, so a malformed
    /// configuration fails at load time rather than on the first call.
    pub fn from_json(
        json: &str,
        service_name: &str,
        default_timeout: Duration,
    ) -> Result<Self, Error> {
        let mut raw = serde_json::from_str::<RawConfig>(json).map_err(Error::Parse)?;
        let raw = raw
            .interfaces
            .remove(service_name)
            .ok_or_else(|| Error::MissingInterface(service_name.to_string()))?;
        let methods = raw.resolve()?;
        Ok(Self {
            service_name: service_name.to_string(),
            defaults: CallOptions::new().set_timeout(default_timeout),
            methods,
            raw,
        })
    }

    /// Applies an application-provided configuration over this one.
    ///
    /// Named retry codes and retry params in `json` replace the entries with
    /// the same name. Method entries replace the existing entries field by
    /// field. Configurations for other services are ignored.
    pub fn with_overrides(mut self, json: &str) -> Result<Self, Error> {
        let mut overrides = serde_json::from_str::<RawConfig>(json).map_err(Error::Parse)?;
        let Some(overrides) = overrides.interfaces.remove(&self.service_name) else {
            return Ok(self);
        };
        self.raw.apply(overrides);
        self.methods = self.raw.resolve()?;
        Ok(self)
    }

    /// Adds a metadata entry, such as `x-goog-api-client`, to the service
    /// defaults.
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.defaults = self.defaults.insert_metadata(key, value);
        self
    }

    /// The service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The service defaults.
    pub fn defaults(&self) -> &CallOptions {
        &self.defaults
    }

    /// The configuration of `method`, if the configuration names it.
    pub fn method(&self, method: &str) -> Option<&MethodConfig> {
        self.methods.get(method)
    }

    /// The defaults for `method`, merged over the service defaults.
    ///
    /// Methods missing from the configuration get the service defaults.
    pub fn method_options(&self, method: &str) -> CallOptions {
        match self.methods.get(method) {
            Some(m) => m.options.merge(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    interfaces: BTreeMap<String, RawInterface>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawInterface {
    #[serde(default)]
    retry_codes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    retry_params: BTreeMap<String, RawRetryParams>,
    #[serde(default)]
    methods: BTreeMap<String, RawMethod>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawRetryParams {
    initial_retry_delay_millis: Option<u64>,
    retry_delay_multiplier: Option<f64>,
    max_retry_delay_millis: Option<u64>,
    total_timeout_millis: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawMethod {
    timeout_millis: Option<u64>,
    retry_codes_name: Option<String>,
    retry_params_name: Option<String>,
    bundling: Option<RawBundling>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RawBundling {
    element_count_threshold: Option<u32>,
    element_count_limit: Option<u32>,
    request_byte_threshold: Option<usize>,
    request_byte_limit: Option<usize>,
    delay_threshold_millis: Option<u64>,
}

macro_rules! override_fields {
    ($target:expr, $source:expr, $($field:ident),+) => {{
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    }};
}

impl RawInterface {
    fn apply(&mut self, overrides: RawInterface) {
        self.retry_codes.extend(overrides.retry_codes);
        for (name, params) in overrides.retry_params {
            let entry = self.retry_params.entry(name).or_default();
            override_fields!(
                entry,
                params,
                initial_retry_delay_millis,
                retry_delay_multiplier,
                max_retry_delay_millis,
                total_timeout_millis
            );
        }
        for (name, method) in overrides.methods {
            let entry = self.methods.entry(name).or_default();
            override_fields!(entry, method, timeout_millis, retry_codes_name, retry_params_name);
            match (&mut entry.bundling, method.bundling) {
                (_, None) => {}
                (None, Some(b)) => entry.bundling = Some(b),
                (Some(current), Some(b)) => override_fields!(
                    current,
                    b,
                    element_count_threshold,
                    element_count_limit,
                    request_byte_threshold,
                    request_byte_limit,
                    delay_threshold_millis
                ),
            }
        }
    }

    fn resolve(&self) -> Result<BTreeMap<String, MethodConfig>, Error> {
        let mut codes = BTreeMap::new();
        for (name, list) in &self.retry_codes {
            let parsed = list
                .iter()
                .map(|c| {
                    Code::try_from(c.as_str()).map_err(|_| Error::UnknownCode {
                        name: name.clone(),
                        code: c.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            codes.insert(name.as_str(), parsed);
        }
        self.methods
            .iter()
            .map(|(method, raw)| Ok((method.clone(), self.resolve_method(method, raw, &codes)?)))
            .collect()
    }

    fn resolve_method(
        &self,
        method: &str,
        raw: &RawMethod,
        codes: &BTreeMap<&str, Vec<Code>>,
    ) -> Result<MethodConfig, Error> {
        let mut options = CallOptions::new();
        if let Some(t) = raw.timeout_millis {
            options = options.set_timeout(Duration::from_millis(t));
        }
        if let Some(codes_name) = &raw.retry_codes_name {
            let retryable = codes
                .get(codes_name.as_str())
                .ok_or_else(|| Error::MissingRetryCodes {
                    method: method.to_string(),
                    name: codes_name.clone(),
                })?;
            let mut builder =
                RetrySettings::builder().with_retryable_codes(retryable.iter().copied());
            if let Some(params_name) = &raw.retry_params_name {
                let params = self
                    .retry_params
                    .get(params_name)
                    .ok_or_else(|| Error::MissingRetryParams {
                        method: method.to_string(),
                        name: params_name.clone(),
                    })?;
                builder = params.configure(builder);
            }
            let settings = builder.build().map_err(|source| Error::InvalidRetryParams {
                name: raw.retry_params_name.clone().unwrap_or_default(),
                source,
            })?;
            options = options.set_retry_settings(settings);
        }
        let bundling = raw.bundling.as_ref().map(RawBundling::to_options);
        Ok(MethodConfig { options, bundling })
    }
}

impl RawRetryParams {
    fn configure(
        &self,
        mut builder: crate::retry_settings::RetrySettingsBuilder,
    ) -> crate::retry_settings::RetrySettingsBuilder {
        if let Some(v) = self.initial_retry_delay_millis {
            builder = builder.with_initial_delay(Duration::from_millis(v));
        }
        if let Some(v) = self.retry_delay_multiplier {
            builder = builder.with_delay_multiplier(v);
        }
        if let Some(v) = self.max_retry_delay_millis {
            builder = builder.with_max_delay(Duration::from_millis(v));
        }
        if let Some(v) = self.total_timeout_millis {
            builder = builder.with_total_timeout(Duration::from_millis(v));
        }
        builder
    }
}

impl RawBundling {
    fn to_options(&self) -> BundlingOptions {
        let mut options = BundlingOptions::new();
        if let Some(v) = self.element_count_threshold {
            options = options.set_element_count_threshold(v);
        }
        if let Some(v) = self.request_byte_threshold {
            options = options.set_request_byte_threshold(v);
        }
        if let Some(v) = self.delay_threshold_millis {
            options = options.set_delay_threshold(Duration::from_millis(v));
        }
        if let Some(v) = self.element_count_limit {
            options = options.set_element_count_limit(v);
        }
        if let Some(v) = self.request_byte_limit {
            options = options.set_request_byte_limit(v);
        }
        options
    }
}
