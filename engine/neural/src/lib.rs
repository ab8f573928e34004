//! Batched network evaluation for the search core.
//!
//! The search talks to three things here: the `Network` trait (a batched
//! position evaluator), the shared fixed-capacity `NnCache`, and the
//! per-iteration `CachingComputation` that accumulates cache misses into a
//! single network call and writes the results through. Backends are created
//! by name via the process-wide factory.

pub mod backends;
pub mod cache;
pub mod caching;
pub mod factory;
pub mod network;

pub use backends::{RandomNetwork, UniformNetwork};
pub use cache::{CacheStats, NnCache, NnCacheEntry};
pub use caching::{AddResult, CachingComputation};
pub use factory::{
    create_backend, list_backends, register_backend, register_default_backends, BackendFactory,
    BackendOptions, FactoryError,
};
pub use network::{Network, NetworkError, NetworkInput, NetworkOutput};
