//! In-memory client library.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use fb_client::{
    Client, ClientLoader, Connection, Credentials, Cursor, Error, LibrarySource, Result, Row,
    SqlValue, Transaction, TransactionOptions,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Answers a query: `(sql, params) -> rows`.
pub type QueryHandler = Arc<dyn Fn(&str, &[SqlValue]) -> Result<Vec<Row>> + Send + Sync>;

/// A capability call that can fail on demand or be held behind a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `Client::connect`.
    Connect,
    /// `Connection::start_transaction`.
    StartTransaction,
    /// `Connection::execute_query`.
    Execute,
    /// `Cursor::fetch_all`.
    Fetch,
    /// `Cursor::close`.
    CloseCursor,
    /// `Transaction::commit`.
    Commit,
    /// `Transaction::rollback`.
    Rollback,
    /// `Connection::disconnect`.
    Disconnect,
    /// `Client::dispose`.
    Dispose,
}

/// One recorded capability call. Calls are recorded when they start,
/// whether or not they go on to fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A client handle was requested from `source`.
    Load {
        /// Library location.
        source: LibrarySource,
        /// Client id, `None` when loading failed.
        client: Option<u64>,
    },
    /// Default credentials were set on a client.
    Credentials {
        /// Client id.
        client: u64,
        /// User name.
        user: String,
        /// Role.
        role: Option<String>,
    },
    /// A connect was attempted.
    Connect {
        /// Client id.
        client: u64,
        /// Connection URI.
        uri: String,
    },
    /// A transaction start was attempted.
    StartTransaction {
        /// Connection id.
        connection: u64,
        /// Requested options.
        options: TransactionOptions,
    },
    /// A statement execution was attempted.
    Execute {
        /// Connection id.
        connection: u64,
        /// SQL text.
        sql: String,
        /// Parameters.
        params: Vec<SqlValue>,
    },
    /// A cursor close was attempted.
    CloseCursor {
        /// Connection id.
        connection: u64,
    },
    /// A commit was attempted.
    Commit {
        /// Connection id.
        connection: u64,
    },
    /// A rollback was attempted.
    Rollback {
        /// Connection id.
        connection: u64,
    },
    /// A disconnect was attempted.
    Disconnect {
        /// Connection id.
        connection: u64,
    },
    /// A client dispose was attempted.
    Dispose {
        /// Client id.
        client: u64,
    },
}

impl Event {
    /// The connection this event concerns, if any.
    #[must_use]
    pub fn connection(&self) -> Option<u64> {
        match self {
            Self::StartTransaction { connection, .. }
            | Self::Execute { connection, .. }
            | Self::CloseCursor { connection }
            | Self::Commit { connection }
            | Self::Rollback { connection }
            | Self::Disconnect { connection } => Some(*connection),
            _ => None,
        }
    }
}

const OPEN_ALL_PERMITS: usize = 1 << 20;

struct GateInner {
    permits: Semaphore,
    blocked: AtomicUsize,
}

/// Holds calls at one [`FaultPoint`] until released.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Let `n` more calls through.
    pub fn open(&self, n: usize) {
        self.inner.permits.add_permits(n);
    }

    /// Let every current and future call through.
    pub fn open_all(&self) {
        self.inner.permits.add_permits(OPEN_ALL_PERMITS);
    }

    /// Number of calls currently held.
    #[must_use]
    pub fn blocked(&self) -> usize {
        self.inner.blocked.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls are held.
    pub async fn wait_blocked(&self, n: usize) {
        while self.blocked() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn pass(&self) {
        self.inner.blocked.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.inner.permits.acquire().await {
            permit.forget();
        }
        self.inner.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockState {
    events: Mutex<Vec<Event>>,
    faults: Mutex<HashMap<FaultPoint, VecDeque<Error>>>,
    load_failures: Mutex<HashMap<LibrarySource, String>>,
    gates: Mutex<HashMap<FaultPoint, Gate>>,
    handler: Mutex<QueryHandler>,
    live_clients: Mutex<BTreeSet<u64>>,
    live_connections: Mutex<BTreeSet<u64>>,
    next_client: AtomicU64,
    next_connection: AtomicU64,
}

impl MockState {
    fn record(&self, event: Event) {
        tracing::trace!(?event, "mock client library call");
        self.events.lock().push(event);
    }

    /// Wait at the gate for `point` (if any), then pop an injected fault.
    async fn enter(&self, point: FaultPoint) -> Result<()> {
        let gate = self.gates.lock().get(&point).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.take_fault(point)
    }

    fn take_fault(&self, point: FaultPoint) -> Result<()> {
        match self.faults.lock().get_mut(&point).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A scriptable in-memory client library.
///
/// Cloning shares the script and the event log.
#[derive(Clone)]
pub struct MockLibrary {
    state: Arc<MockState>,
}

impl Default for MockLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLibrary {
    /// Create a library that loads from everywhere and never fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                events: Mutex::new(Vec::new()),
                faults: Mutex::new(HashMap::new()),
                load_failures: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                handler: Mutex::new(Arc::new(default_handler) as QueryHandler),
                live_clients: Mutex::new(BTreeSet::new()),
                live_connections: Mutex::new(BTreeSet::new()),
                next_client: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    /// Fail the next call at `point` with `error`. Repeated calls queue up.
    pub fn fail_next(&self, point: FaultPoint, error: Error) {
        self.state
            .faults
            .lock()
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Make every load from `source` fail with `message`.
    pub fn fail_load(&self, source: LibrarySource, message: impl Into<String>) {
        self.state
            .load_failures
            .lock()
            .insert(source, message.into());
    }

    /// Replace the query handler.
    pub fn on_query<F>(&self, handler: F)
    where
        F: Fn(&str, &[SqlValue]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        let handler: QueryHandler = Arc::new(handler);
        *self.state.handler.lock() = handler;
    }

    /// Hold every call at `point` until the returned gate is opened.
    #[must_use]
    pub fn gate(&self, point: FaultPoint) -> Gate {
        let gate = Gate {
            inner: Arc::new(GateInner {
                permits: Semaphore::new(0),
                blocked: AtomicUsize::new(0),
            }),
        };
        self.state.gates.lock().insert(point, gate.clone());
        gate
    }

    /// Snapshot of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.state.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.state.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Connects attempted.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, Event::Connect { .. }))
    }

    /// Connection ids that have been opened and not yet disconnected.
    #[must_use]
    pub fn open_connections(&self) -> Vec<u64> {
        self.state.live_connections.lock().iter().copied().collect()
    }

    /// Client ids that have been loaded and not yet disposed.
    #[must_use]
    pub fn live_clients(&self) -> Vec<u64> {
        self.state.live_clients.lock().iter().copied().collect()
    }
}

impl ClientLoader for MockLibrary {
    fn load(&self, source: &LibrarySource) -> Result<Box<dyn Client>> {
        if let Some(message) = self.state.load_failures.lock().get(source) {
            self.state.record(Event::Load {
                source: source.clone(),
                client: None,
            });
            return Err(Error::LibraryLoad {
                library: source.to_string(),
                message: message.clone(),
            });
        }

        let id = self.state.next_client.fetch_add(1, Ordering::Relaxed);
        self.state.live_clients.lock().insert(id);
        self.state.record(Event::Load {
            source: source.clone(),
            client: Some(id),
        });

        Ok(Box::new(MockClient {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

struct MockClient {
    state: Arc<MockState>,
    id: u64,
}

#[async_trait]
impl Client for MockClient {
    fn set_default_credentials(&mut self, credentials: &Credentials) {
        self.state.record(Event::Credentials {
            client: self.id,
            user: credentials.user.clone(),
            role: credentials.role.clone(),
        });
    }

    async fn connect(&mut self, uri: &str) -> Result<Box<dyn Connection>> {
        self.state.record(Event::Connect {
            client: self.id,
            uri: uri.to_string(),
        });
        self.state.enter(FaultPoint::Connect).await?;

        let id = self.state.next_connection.fetch_add(1, Ordering::Relaxed);
        self.state.live_connections.lock().insert(id);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            id,
        }))
    }

    async fn dispose(&mut self) -> Result<()> {
        self.state.record(Event::Dispose { client: self.id });
        // The handle is gone whether or not dispose reports an error.
        self.state.live_clients.lock().remove(&self.id);
        self.state.enter(FaultPoint::Dispose).await
    }
}

struct MockConnection {
    state: Arc<MockState>,
    id: u64,
}

#[async_trait]
impl Connection for MockConnection {
    async fn start_transaction(
        &mut self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>> {
        self.state.record(Event::StartTransaction {
            connection: self.id,
            options,
        });
        self.state.enter(FaultPoint::StartTransaction).await?;

        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            connection: self.id,
        }))
    }

    async fn execute_query(
        &mut self,
        _transaction: &mut dyn Transaction,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn Cursor>> {
        self.state.record(Event::Execute {
            connection: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.state.enter(FaultPoint::Execute).await?;

        let handler = Arc::clone(&*self.state.handler.lock());
        let rows = handler(sql, params)?;

        Ok(Box::new(MockCursor {
            state: Arc::clone(&self.state),
            connection: self.id,
            rows: Some(rows),
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.record(Event::Disconnect {
            connection: self.id,
        });
        self.state.live_connections.lock().remove(&self.id);
        self.state.enter(FaultPoint::Disconnect).await
    }
}

struct MockTransaction {
    state: Arc<MockState>,
    connection: u64,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.state.record(Event::Commit {
            connection: self.connection,
        });
        self.state.enter(FaultPoint::Commit).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.record(Event::Rollback {
            connection: self.connection,
        });
        self.state.enter(FaultPoint::Rollback).await
    }
}

struct MockCursor {
    state: Arc<MockState>,
    connection: u64,
    rows: Option<Vec<Row>>,
}

#[async_trait]
impl Cursor for MockCursor {
    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.state.enter(FaultPoint::Fetch).await?;
        Ok(self.rows.take().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.record(Event::CloseCursor {
            connection: self.connection,
        });
        self.state.enter(FaultPoint::CloseCursor).await
    }
}

fn default_handler(sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.eq_ignore_ascii_case("SELECT 1 AS x FROM RDB$DATABASE") {
        return Ok(vec![Row::from_pairs([("X", SqlValue::Integer(1))])]);
    }
    Ok(Vec::new())
}
