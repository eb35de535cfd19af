//! Transaction options.

use std::fmt;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed, seeing the latest committed record version.
    #[default]
    ReadCommittedRecordVersion,
    /// Read committed, waiting on (or failing for) uncommitted versions.
    ReadCommittedNoRecordVersion,
    /// Snapshot ("concurrency").
    Snapshot,
    /// Snapshot with table stability ("consistency").
    SnapshotTableStability,
}

impl IsolationLevel {
    /// The SQL clause for this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommittedRecordVersion => "ISOLATION LEVEL READ COMMITTED RECORD_VERSION",
            Self::ReadCommittedNoRecordVersion => {
                "ISOLATION LEVEL READ COMMITTED NO RECORD_VERSION"
            }
            Self::Snapshot => "ISOLATION LEVEL SNAPSHOT",
            Self::SnapshotTableStability => "ISOLATION LEVEL SNAPSHOT TABLE STABILITY",
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// No writes allowed.
    #[default]
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl AccessMode {
    /// The SQL clause for this access mode.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadOnly => "READ ONLY",
            Self::ReadWrite => "READ WRITE",
        }
    }
}

/// Options passed to [`Connection::start_transaction`](crate::Connection::start_transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Isolation and visibility.
    pub isolation: IsolationLevel,
    /// Access mode.
    pub access: AccessMode,
}

impl TransactionOptions {
    /// Read committed, record-version visibility, read only.
    ///
    /// The only mode the query executor ever uses.
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommittedRecordVersion,
            access: AccessMode::ReadOnly,
        }
    }

    /// Whether writes are refused.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }
}

impl fmt::Display for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SET TRANSACTION {} {}",
            self.access.as_sql(),
            self.isolation.as_sql()
        )
    }
}
