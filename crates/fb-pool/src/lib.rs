//! # fb-driver-pool
//!
//! Bounded per-target connection pools for Firebird, with a read-only
//! transactional query executor on top.
//!
//! Every query borrows a pooled connection, runs inside its own read-only
//! `READ COMMITTED RECORD_VERSION` transaction, commits, and hands the
//! connection back. A connection that saw any failure is rolled back and
//! destroyed instead of being reused.
//!
//! ## Features
//!
//! - One pool per distinct target, created on first use
//! - Hard per-target connection cap with FIFO queueing for callers
//! - Acquisition deadline for queued callers
//! - Replacement connections for queued callers after a failure
//! - Idle reaper closing connections unused for too long
//! - Stored-procedure probing across names and parameter shapes
//! - Metrics and `tracing` spans for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::TargetDescriptor;
//! use fb_driver_pool::{PoolConfig, PoolManager};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .max_connections(5)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let manager = PoolManager::new(loader, config)?;
//! manager.start_reaper();
//!
//! let target = TargetDescriptor::new("/data/sales.fdb").with_host("db.internal");
//! let rows = manager
//!     .execute_query(&target, "SELECT 1 AS x FROM RDB$DATABASE", &[])
//!     .await?;
//! let x: i32 = rows[0].get_by_name("X")?;
//!
//! // Check pool status
//! let status = manager.pool(&target).status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! manager.close_all().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod lifecycle;
pub mod pool;
pub mod procedure;
mod reaper;
pub mod registry;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use factory::ConnectionFactory;
pub use pool::{Pool, PoolMetrics, PoolStatus, PooledConnection};
pub use registry::PoolManager;

// Lifecycle management
pub use lifecycle::{EntryId, EntryMetadata, EntryState, PoolEntry};

// Procedures
pub use procedure::{ProcedureCall, ProcedureStyle};
