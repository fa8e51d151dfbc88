//! Service Configuration Model
//!
//! The remote agent pipeline is configured per service (`llm`, `tts`, ...).
//! Each service owns a JSON object of named options. This module holds that
//! model and the merge policy used when the client updates it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Service name of the language model in the agent pipeline.
pub const LLM_SERVICE: &str = "llm";
/// Service name of the text-to-speech engine in the agent pipeline.
pub const TTS_SERVICE: &str = "tts";
/// Services forwarded to a live agent in a CONFIG message.
pub const PIPELINE_SERVICES: [&str; 2] = [LLM_SERVICE, TTS_SERVICE];

/// Named options of a single service. Values may be arbitrarily nested.
pub type ServiceOptions = Map<String, Value>;

/// A single named option, as found in the list form of a configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigOption {
    pub name: String,
    pub value: Value,
}

/// The option list of one service, as found in the list form of a configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceConfigOption {
    pub service: String,
    pub options: Vec<ConfigOption>,
}

/// One entry of the LLM context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Configuration of the agent pipeline: service name to its options.
///
/// Backed by an ordered map, so a service name can only appear once.
/// Serializes as a plain JSON object, e.g. `{"llm":{"model":"A"}}`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ClientConfig {
    services: BTreeMap<String, ServiceOptions>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from a JSON object of service objects.
    ///
    /// Returns `None` when `value` is not an object or one of its services
    /// does not map to an object.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// Builds a configuration from its list form.
    ///
    /// A service repeated in the list has its later options merged over the
    /// earlier ones.
    pub fn from_service_options(list: Vec<ServiceConfigOption>) -> Self {
        let mut config = Self::new();
        for entry in list {
            let options = config.services.entry(entry.service).or_default();
            for option in entry.options {
                options.insert(option.name, option.value);
            }
        }
        config
    }

    /// Converts the configuration to its list form.
    pub fn to_service_options(&self) -> Vec<ServiceConfigOption> {
        self.services
            .iter()
            .map(|(service, options)| ServiceConfigOption {
                service: service.clone(),
                options: options
                    .iter()
                    .map(|(name, value)| ConfigOption {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Sets the options of `service`, replacing any previous ones.
    pub fn with_service(mut self, service: impl Into<String>, options: ServiceOptions) -> Self {
        self.set_service(service, options);
        self
    }

    pub fn set_service(&mut self, service: impl Into<String>, options: ServiceOptions) {
        self.services.insert(service.into(), options);
    }

    pub fn service(&self, service: &str) -> Option<&ServiceOptions> {
        self.services.get(service)
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceOptions)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns a copy restricted to the services in `names`.
    pub fn restricted_to(&self, names: &[&str]) -> Self {
        let services = self
            .services
            .iter()
            .filter(|(name, _)| names.contains(&name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { services }
    }

    /// Recursively merges `overlay` into a copy of `self`.
    ///
    /// See [`deep_merge`] for the exact policy.
    pub fn deep_merged(&self, overlay: &ClientConfig) -> ClientConfig {
        let mut services = self.services.clone();
        for (name, options) in &overlay.services {
            let merged = match services.get(name) {
                Some(base) => merge_objects(base, options),
                None => strip_nulls(options),
            };
            services.insert(name.clone(), merged);
        }
        Self { services }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.services
                .iter()
                .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                .collect(),
        )
    }
}

/// Recursively merges `overlay` over `base` and returns the result.
///
/// - objects are merged key by key;
/// - arrays are replaced wholesale by the incoming array;
/// - an incoming `null` is "no override": the base value is kept, and a key
///   missing from `base` is not created;
/// - any other incoming value replaces the base value.
///
/// Neither input is modified.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (_, Value::Null) => base.clone(),
        (Value::Object(base), Value::Object(overlay)) => {
            Value::Object(merge_objects(base, overlay))
        }
        (_, Value::Object(overlay)) => Value::Object(strip_nulls(overlay)),
        (_, other) => other.clone(),
    }
}

fn merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, incoming) in overlay {
        match merged.get(key) {
            Some(existing) => {
                let value = deep_merge(existing, incoming);
                merged.insert(key.clone(), value);
            }
            None if incoming.is_null() => {}
            None => {
                merged.insert(key.clone(), deep_merge(&Value::Null, incoming));
            }
        }
    }
    merged
}

fn strip_nulls(map: &Map<String, Value>) -> Map<String, Value> {
    merge_objects(&Map::new(), map)
}
