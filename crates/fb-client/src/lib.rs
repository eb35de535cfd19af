//! # fb-client
//!
//! Client-library seam for Firebird connections.
//!
//! This crate does not speak the wire protocol itself. It describes what the
//! pool needs from a native client library and the values that flow through
//! it:
//!
//! - [`TargetDescriptor`]: immutable identity of one database endpoint plus
//!   credentials
//! - [`ClientLoader`], [`Client`], [`Connection`], [`Transaction`] and
//!   [`Cursor`]: the capabilities a driver has to provide
//! - [`TransactionOptions`]: isolation, record-version visibility and access
//!   mode for a transaction
//! - [`Row`] and [`SqlValue`]: materialized result rows with case-insensitive
//!   typed field lookup
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::{Row, TargetDescriptor};
//!
//! let target = TargetDescriptor::new("/data/sales.fdb")
//!     .with_host("db.internal")
//!     .with_user("REPORTS")
//!     .with_password("secret");
//!
//! assert_eq!(target.connection_uri(), "db.internal/3050:/data/sales.fdb");
//!
//! let total: i64 = row.get_by_name("total")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod identifier;
pub mod instrumentation;
pub mod row;
pub mod transaction;
pub mod value;

pub use config::{Credentials, PoolKey, TargetDescriptor};
pub use driver::{Client, ClientLoader, Connection, Cursor, LibrarySource, Transaction};
pub use error::{Error, Result};
pub use identifier::validate_identifier;
pub use row::{Column, Row};
pub use transaction::{AccessMode, IsolationLevel, TransactionOptions};
pub use value::{FromSql, SqlValue, TypeError};
