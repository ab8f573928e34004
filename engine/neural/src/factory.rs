//! Process-wide backend factory.
//!
//! Backends register by name; the protocol loop creates one by the name the
//! user configured. Registration typically happens during program setup,
//! before any search is constructed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::warn;

use crate::backends::{RandomNetwork, UniformNetwork};
use crate::network::Network;

/// String key/value options forwarded to the backend constructor.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    entries: HashMap<String, String>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// Errors from backend creation.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("backend {name} failed to initialize: {reason}")]
    InitFailure { name: String, reason: String },
}

/// Factory function producing a ready-to-use network.
pub type BackendFactory = fn(&BackendOptions) -> Result<Arc<dyn Network>, FactoryError>;

static REGISTRY: Lazy<Mutex<HashMap<String, BackendFactory>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a backend under a name. Re-registering replaces the factory.
pub fn register_backend(name: &str, factory: BackendFactory) {
    let mut registry = REGISTRY.lock().unwrap();
    if registry.contains_key(name) {
        warn!(backend = %name, "Overriding existing backend registration");
    }
    registry.insert(name.to_string(), factory);
}

/// Create a backend by name.
pub fn create_backend(name: &str, options: &BackendOptions) -> Result<Arc<dyn Network>, FactoryError> {
    let factory = {
        let registry = REGISTRY.lock().unwrap();
        registry.get(name).copied()
    };
    match factory {
        Some(factory) => factory(options),
        None => Err(FactoryError::UnknownBackend(name.to_string())),
    }
}

/// Names of all registered backends, sorted.
pub fn list_backends() -> Vec<String> {
    let registry = REGISTRY.lock().unwrap();
    let mut names: Vec<String> = registry.keys().cloned().collect();
    names.sort();
    names
}

fn make_uniform(_options: &BackendOptions) -> Result<Arc<dyn Network>, FactoryError> {
    Ok(Arc::new(UniformNetwork::new()))
}

fn make_random(options: &BackendOptions) -> Result<Arc<dyn Network>, FactoryError> {
    let seed = match options.get("seed") {
        Some(raw) => raw.parse::<u64>().map_err(|e| FactoryError::InitFailure {
            name: "random".to_string(),
            reason: format!("bad seed {raw:?}: {e}"),
        })?,
        None => 0,
    };
    Ok(Arc::new(RandomNetwork::new(seed)))
}

/// Install the built-in reference backends.
pub fn register_default_backends() {
    let mut registry = REGISTRY.lock().unwrap();
    registry.entry("uniform".to_string()).or_insert(make_uniform as BackendFactory);
    registry.entry("random".to_string()).or_insert(make_random as BackendFactory);
}
