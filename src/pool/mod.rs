//! Bounded pooling of backend handles.
//!
//! Backend handles (an open file plus its parsed index, or a remote session)
//! are expensive to build and cannot be used by two tasks at once. The pool
//! lets many concurrent tile loads share a small, fixed number of them.
//!
//! # Components
//!
//! - [`ResourceFactory`]: builds, optionally clones, and closes handles
//! - [`ResourcePool`]: bounded FIFO-fair pool with eager or dynamic creation
//! - [`Pooled`]: RAII guard returned by `acquire`, recycles on drop
//!
//! # Guarantees
//!
//! - At most `capacity` handles are ever constructed
//! - At most one construction runs at any time
//! - A handle is owned by exactly one caller at a time
//! - Shutdown closes every handle exactly once, including ones returned later

mod factory;
mod resource_pool;

pub use factory::ResourceFactory;
pub use resource_pool::{
    CreationMode, PoolConfig, PoolStats, Pooled, ResourcePool, DEFAULT_POOL_CAPACITY,
};
