//! The entity producing telemetry, described once and attached to every
//! exported batch.

use crate::common::{Key, KeyValue, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

const SERVICE_NAME: &str = "service.name";
const SERVICE_NAMESPACE: &str = "service.namespace";
const SERVICE_VERSION: &str = "service.version";
const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";

/// An immutable set of attributes identifying the service instance.
///
/// A `Resource` is built once at startup and shared by all providers; its
/// attributes ride along with every span, log and metric batch rather than
/// being stamped on individual items.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    attrs: Arc<HashMap<Key, Value>>,
}

impl Resource {
    /// Creates a builder for a `Resource`.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::from_env(),
        }
    }

    /// Creates a builder with no pre-populated attributes.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::default(),
        }
    }

    /// Creates a `Resource` from the given attributes.
    pub fn new<T: IntoIterator<Item = KeyValue>>(kvs: T) -> Self {
        let mut attrs = HashMap::new();
        for kv in kvs {
            attrs.insert(kv.key, kv.value);
        }
        Resource {
            attrs: Arc::new(attrs),
        }
    }

    /// Describes the service from its standard environment variables.
    ///
    /// Every identity attribute has a fallback so a resource is always
    /// complete, even on an unconfigured developer machine.
    fn from_env() -> Self {
        let lookup = |var: &str, default: &'static str| -> Value {
            match env::var(var) {
                Ok(v) if !v.is_empty() => Value::String(Cow::Owned(v)),
                _ => Value::String(Cow::Borrowed(default)),
            }
        };

        Resource::new([
            KeyValue::new(SERVICE_NAME, lookup("OTEL_SERVICE_NAME", "constellation-service")),
            KeyValue::new(
                SERVICE_NAMESPACE,
                lookup("OTEL_SERVICE_NAMESPACE", "constellation"),
            ),
            KeyValue::new(SERVICE_VERSION, lookup("OTEL_SERVICE_VERSION", "1.0.0")),
            KeyValue::new(
                DEPLOYMENT_ENVIRONMENT,
                lookup("DEPLOYMENT_ENVIRONMENT", "development"),
            ),
            KeyValue::new(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(TELEMETRY_SDK_LANGUAGE, "rust"),
            KeyValue::new(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION")),
        ])
    }

    /// Returns the value for the given key, if present.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Returns the `service.name` attribute value, if present.
    pub fn service_name(&self) -> Option<&Value> {
        self.get(&Key::new(SERVICE_NAME))
    }

    /// Iterates over the resource attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.attrs.iter()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Returns whether the resource has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// A builder for [`Resource`].
#[derive(Clone, Debug)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Overrides the `service.name` attribute.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue::new(SERVICE_NAME, name.into()))
    }

    /// Adds or replaces a single attribute.
    pub fn with_attribute(mut self, kv: KeyValue) -> Self {
        let attrs = Arc::make_mut(&mut self.resource.attrs);
        attrs.insert(kv.key, kv.value);
        self
    }

    /// Adds or replaces multiple attributes.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        let attrs = Arc::make_mut(&mut self.resource.attrs);
        for kv in kvs {
            attrs.insert(kv.key, kv.value);
        }
        self
    }

    /// Builds the `Resource`.
    pub fn build(self) -> Resource {
        self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_attributes() {
        temp_env::with_vars_unset(
            [
                "OTEL_SERVICE_NAME",
                "OTEL_SERVICE_NAMESPACE",
                "OTEL_SERVICE_VERSION",
                "DEPLOYMENT_ENVIRONMENT",
            ],
            || {
                let resource = Resource::builder().build();
                assert_eq!(
                    resource.service_name(),
                    Some(&Value::from("constellation-service"))
                );
                assert_eq!(
                    resource.get(&Key::new("service.namespace")),
                    Some(&Value::from("constellation"))
                );
                assert_eq!(
                    resource.get(&Key::new("service.version")),
                    Some(&Value::from("1.0.0"))
                );
                assert_eq!(
                    resource.get(&Key::new("deployment.environment")),
                    Some(&Value::from("development"))
                );
                assert_eq!(
                    resource.get(&Key::new("telemetry.sdk.language")),
                    Some(&Value::from("rust"))
                );
            },
        );
    }

    #[test]
    fn env_overrides_defaults() {
        temp_env::with_vars(
            [
                ("OTEL_SERVICE_NAME", Some("orbit")),
                ("DEPLOYMENT_ENVIRONMENT", Some("production")),
            ],
            || {
                let resource = Resource::builder().build();
                assert_eq!(resource.service_name(), Some(&Value::from("orbit")));
                assert_eq!(
                    resource.get(&Key::new("deployment.environment")),
                    Some(&Value::from("production"))
                );
            },
        );
    }

    #[test]
    fn builder_attribute_replaces() {
        let resource = Resource::builder_empty()
            .with_service_name("a")
            .with_service_name("b")
            .with_attribute(KeyValue::new("region", "eu-west-1"))
            .build();
        assert_eq!(resource.service_name(), Some(&Value::from("b")));
        assert_eq!(
            resource.get(&Key::new("region")),
            Some(&Value::from("eu-west-1"))
        );
        assert_eq!(resource.len(), 2);
    }
}
