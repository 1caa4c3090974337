use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Type-safe configuration key that associates a key name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

// ===== Dispatch Configuration =====

/// How a session dispatcher builds, delivers and disposes event payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Build event args with ownership of the native handle so it is released
    /// as soon as the fields have been copied out
    pub release_after_extraction: bool,
    /// Handlers running longer than this are logged as slow
    pub slow_handler_warn_ms: u64,
    /// Treat a double release as a debug assertion failure
    pub fatal_double_release: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            release_after_extraction: true,
            slow_handler_warn_ms: 250,
            fatal_double_release: false,
        }
    }
}

impl DispatchConfig {
    pub fn slow_handler_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_handler_warn_ms)
    }
}

impl ConfigKey<DispatchConfig> {
    pub const DISPATCH: Self = Self::new("dispatchConfig");
}

// ===== Type-Safe Config Store =====

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config document: {0}")]
    InvalidDocument(String),
    #[error("Failed to (de)serialize config value: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError>;
}

/// Config store over a JSON object, one top-level field per key
#[derive(Debug, Default)]
pub struct JsonConfigStore {
    data: Mutex<serde_json::Map<String, serde_json::Value>>,
}

impl JsonConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON document whose root is an object
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str(document)? {
            serde_json::Value::Object(map) => Ok(Self {
                data: Mutex::new(map),
            }),
            other => Err(ConfigError::InvalidDocument(format!(
                "expected an object at the root, found {}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> String {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::Value::Object(data.clone()).to_string()
    }
}

impl ConfigStore for JsonConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let value = data.get(key.key_name())?.clone();
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("Ignoring malformed config '{}': {}", key.key_name(), e);
                None
            }
        }
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError> {
        let val = serde_json::to_value(value)?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.key_name().to_string(), val);
        Ok(())
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key.key_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_store() {
        let test_cases = vec![
            (
                "DispatchConfig with defaults",
                ConfigKey::DISPATCH,
                DispatchConfig::default(),
            ),
            (
                "DispatchConfig keeping handles until disposal",
                ConfigKey::DISPATCH,
                DispatchConfig {
                    release_after_extraction: false,
                    slow_handler_warn_ms: 1000,
                    fatal_double_release: true,
                },
            ),
        ];

        for (description, key, config) in test_cases {
            let store = JsonConfigStore::new();
            assert_stored_lifecycle(&store, &key, config, description);
        }
    }

    #[test]
    fn test_partial_document_falls_back_to_defaults() {
        let store =
            JsonConfigStore::from_json(r#"{"dispatchConfig": {"slowHandlerWarnMs": 40}}"#).unwrap();

        let config = store.get(&ConfigKey::DISPATCH).unwrap();
        assert_eq!(
            config,
            DispatchConfig {
                slow_handler_warn_ms: 40,
                ..DispatchConfig::default()
            }
        );
        assert_eq!(config.slow_handler_threshold(), Duration::from_millis(40));
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let store =
            JsonConfigStore::from_json(r#"{"dispatchConfig": {"slowHandlerWarnMs": "soon"}}"#)
                .unwrap();
        assert!(store.get(&ConfigKey::DISPATCH).is_none());
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        let result = JsonConfigStore::from_json("[1, 2, 3]");
        assert!(matches!(result, Err(ConfigError::InvalidDocument(_))));

        let result = JsonConfigStore::from_json("{not json");
        assert!(matches!(result, Err(ConfigError::Serde(_))));
    }

    fn is_camel_case(name: &str) -> bool {
        name.starts_with(|c: char| c.is_ascii_lowercase())
            && name.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// get (missing) -> set -> get -> delete -> get (missing), checking the
    /// stored layout on the way.
    fn assert_stored_lifecycle<T>(
        store: &JsonConfigStore,
        key: &ConfigKey<T>,
        test_config: T,
        description: &str,
    ) where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug + Clone,
    {
        assert!(store.get(key).is_none(), "{}: unexpected value before set", description);

        store
            .set(key, test_config.clone())
            .unwrap_or_else(|e| panic!("{}: Set should succeed: {}", description, e));

        assert_eq!(store.get(key), Some(test_config), "{}: read back differs", description);

        // Stored field names must be camelCase
        assert!(is_camel_case(key.key_name()));
        let stored: serde_json::Value = serde_json::from_str(&store.to_json()).unwrap();
        if let Some(obj) = stored[key.key_name()].as_object() {
            for field in obj.keys() {
                assert!(
                    is_camel_case(field),
                    "{}: field '{}' is not camelCase",
                    description,
                    field
                );
            }
        }

        store
            .delete(key)
            .unwrap_or_else(|e| panic!("{}: Delete should succeed: {}", description, e));

        assert!(store.get(key).is_none(), "{}: value survived delete", description);
    }
}
