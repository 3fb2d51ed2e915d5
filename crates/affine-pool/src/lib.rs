//! # affine-pool
//!
//! Bounded, thread-affine resource pool.
//!
//! The pool shares a fixed number of expensive resources (connections,
//! sessions, large buffers) across concurrent threads. Each owner holds at
//! most one resource at a time, for the duration of a scoped
//! [`Pool::hold`] call.
//!
//! ## Features
//!
//! - Lazy creation up to a configured maximum
//! - LIFO reuse so the warmest resource is handed out first
//! - Nested holds by the same owner share one resource
//! - Guaranteed release on every exit path, panics included
//! - Bounded polling wait with distinct "unavailable" and "timed out" errors
//! - Salvage of resources left behind by dead owners
//! - Explicit discard of broken resources
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use affine_pool::{Owner, Pool, PoolError};
//!
//! let pool = Pool::builder(|| Some(Vec::<u8>::new()))
//!     .max_size(4)
//!     .pool_timeout(Duration::from_secs(1))
//!     .build()?;
//!
//! let owner = Owner::current();
//! pool.hold(&owner, |buf| {
//!     assert!(buf.is_empty());
//!     // Nested holds by the same owner reuse the resource.
//!     pool.hold(&owner, |_| Ok::<_, PoolError>(()))
//! })?;
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! # Ok::<(), PoolError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod owner;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Owner identity
pub use owner::{Owner, OwnerId};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus};

// Lifecycle management
pub use lifecycle::{Destructor, Factory, Lifecycle};
