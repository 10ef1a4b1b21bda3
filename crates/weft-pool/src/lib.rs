//! Weft resource pooling
//!
//! This crate provides the resource half of weft:
//! - Bounded per-name resource pools with FIFO waiting and loan accounting
//! - A lazy pool registry (one pool per backend name, created on first use)
//! - A connection resolver that caches one handle per task per name in the
//!   task's context store and returns it to its pool when the task ends
//!
//! Pools hand out [`pool::ConnHandle`]s; within one task, repeated
//! [`resolver::ConnectionResolver::connection`] calls for the same name
//! return the identical handle until the task ends. Outside any task the
//! resolver degrades to uncached acquisition (see the resolver docs).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod connector;
pub mod error;
pub mod pool;
pub mod registry;
pub mod resolver;

pub use config::{PoolConfig, PoolSettings, SettingsError};
pub use connector::{ConnectError, Connector, FnConnector};
pub use error::PoolError;
pub use pool::{ConnHandle, Pool, PooledConn};
pub use registry::PoolRegistry;
pub use resolver::ConnectionResolver;
