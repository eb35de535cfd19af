//! # fb-testing
//!
//! Test infrastructure for the Firebird pool.
//!
//! [`MockLibrary`] implements every client-library capability in memory.
//! Tests use it to:
//!
//! - inject a failure into the next call of any capability ([`FaultPoint`])
//! - make a library location fail to load
//! - hold calls in flight behind a [`Gate`] until the test releases them
//! - answer queries with a custom handler
//! - assert on the ordered [`Event`] log of everything the pool did
//!
//! Out of the box the mock answers `SELECT 1 AS x FROM RDB$DATABASE` with a
//! single row whose `X` column is `1`, and returns no rows for anything else.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{Event, FaultPoint, Gate, MockLibrary, QueryHandler};
