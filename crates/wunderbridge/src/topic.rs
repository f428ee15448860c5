//! Bus topic naming: `<namespace>/stations/<station>/<property>`.

/// Default topic namespace.
pub const DEFAULT_NAMESPACE: &str = "weather_underground";

/// Build a topic for a station property.
pub fn topic(namespace: &str, station_id: &str, property: &str) -> String {
    format!("{}/stations/{}/{}", namespace, station_id, property)
}

/// Topic builder bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self, station_id: &str, property: &str) -> String {
        topic(&self.namespace, station_id, property)
    }
}
