//! Backend adapters, the shared adapter registry, the credential pool
//! manager and the retry helper.
//!
//! Each backend exposes the same [`Adapter`] contract; authentication state
//! lives inside the adapter instance and is shared through the registry's
//! per-`(provider, uuid)` singletons.

pub mod adapter;
pub mod backends;
pub mod credentials;
mod http;
pub mod pool;
pub mod registry;
pub mod retry;

pub use adapter::{Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY};
pub use pool::{PoolError, PoolSelection, ProviderPoolManager};
pub use registry::AdapterRegistry;
pub use retry::{with_retry, RetryPolicy};
