//! Pool entries and their lifecycle.

use std::fmt;

use fb_client::{Client, Connection, Transaction};
use tokio::time::Instant;

use crate::factory::Opened;

/// Identity of a pool entry. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether an entry is available or checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Sitting in the pool.
    Idle,
    /// Owned by exactly one in-flight execution.
    Busy,
}

/// Bookkeeping about an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryMetadata {
    /// Entry id.
    pub id: EntryId,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the entry was last checked out or returned.
    pub last_used_at: Instant,
    /// Current state.
    pub state: EntryState,
}

impl EntryMetadata {
    /// Whether the entry has been idle for at least `timeout` as of `now`.
    #[must_use]
    pub fn idle_expired(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.state == EntryState::Idle && now.saturating_duration_since(self.last_used_at) >= timeout
    }
}

/// One managed connection: the client handle, its connection, and the
/// transaction currently open on it, if any.
pub struct PoolEntry {
    pub(crate) metadata: EntryMetadata,
    pub(crate) client: Box<dyn Client>,
    pub(crate) connection: Box<dyn Connection>,
    pub(crate) transaction: Option<Box<dyn Transaction>>,
}

impl PoolEntry {
    pub(crate) fn new(id: EntryId, opened: Opened) -> Self {
        let now = Instant::now();
        Self {
            metadata: EntryMetadata {
                id,
                created_at: now,
                last_used_at: now,
                state: EntryState::Busy,
            },
            client: opened.client,
            connection: opened.connection,
            transaction: None,
        }
    }

    /// Entry id.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.metadata.id
    }

    /// Entry metadata.
    #[must_use]
    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    /// The underlying connection.
    pub fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    pub(crate) fn mark(&mut self, state: EntryState) {
        self.metadata.state = state;
        self.metadata.last_used_at = Instant::now();
    }

    /// Roll back the open transaction, if any. Failures are logged, not returned.
    pub(crate) async fn rollback_quietly(&mut self) {
        if let Some(mut transaction) = self.transaction.take() {
            if let Err(err) = transaction.rollback().await {
                tracing::warn!(entry = %self.metadata.id, error = %err, "rollback failed");
            }
        }
    }

    /// Best-effort teardown: transaction, then connection, then client.
    ///
    /// Every step runs regardless of earlier failures; failures are logged.
    pub(crate) async fn close(mut self) {
        self.rollback_quietly().await;

        if let Err(err) = self.connection.disconnect().await {
            tracing::warn!(entry = %self.metadata.id, error = %err, "disconnect failed");
        }
        if let Err(err) = self.client.dispose().await {
            tracing::warn!(entry = %self.metadata.id, error = %err, "client dispose failed");
        }

        tracing::debug!(entry = %self.metadata.id, "connection closed");
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("metadata", &self.metadata)
            .field("in_transaction", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::factory::ConnectionFactory;
    use fb_client::{Error, TargetDescriptor, TransactionOptions};
    use fb_testing::{Event, FaultPoint, MockLibrary};

    async fn open_entry(library: &MockLibrary) -> PoolEntry {
        let factory = ConnectionFactory::new(Arc::new(library.clone()));
        let opened = factory.open(&TargetDescriptor::new("employee")).await.unwrap();
        PoolEntry::new(EntryId(1), opened)
    }

    #[test]
    fn test_idle_expired() {
        let now = Instant::now();
        let mut metadata = EntryMetadata {
            id: EntryId(1),
            created_at: now,
            last_used_at: now,
            state: EntryState::Idle,
        };
        let later = now + Duration::from_secs(300);

        assert!(metadata.idle_expired(later, Duration::from_secs(300)));
        assert!(!metadata.idle_expired(later, Duration::from_secs(301)));

        metadata.state = EntryState::Busy;
        assert!(!metadata.idle_expired(later, Duration::from_secs(1)));
    }

    #[test]
    fn test_close_runs_every_step() {
        let library = MockLibrary::new();
        library.fail_next(FaultPoint::Rollback, Error::ConnectionLost("gone".into()));
        library.fail_next(FaultPoint::Disconnect, Error::ConnectionLost("gone".into()));

        tokio_test::block_on(async {
            let mut entry = open_entry(&library).await;
            let transaction = entry
                .connection
                .start_transaction(TransactionOptions::read_only())
                .await
                .unwrap();
            entry.transaction = Some(transaction);
            entry.close().await;
        });

        let tail: Vec<Event> = library.events().into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                Event::Dispose { client: 1 },
                Event::Disconnect { connection: 1 },
                Event::Rollback { connection: 1 },
            ]
        );
        assert!(library.open_connections().is_empty());
        assert!(library.live_clients().is_empty());
    }

    #[test]
    fn test_rollback_quietly_clears_transaction() {
        let library = MockLibrary::new();

        tokio_test::block_on(async {
            let mut entry = open_entry(&library).await;
            entry.rollback_quietly().await;
            assert_eq!(library.count(|e| matches!(e, Event::Rollback { .. })), 0);

            let transaction = entry
                .connection
                .start_transaction(TransactionOptions::read_only())
                .await
                .unwrap();
            entry.transaction = Some(transaction);
            entry.rollback_quietly().await;
            assert!(entry.transaction.is_none());
            assert_eq!(library.count(|e| matches!(e, Event::Rollback { .. })), 1);
        });
    }
}
