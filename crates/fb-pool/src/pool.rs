//! Connection pool implementation.
//!
//! One [`Pool`] serves one target. Its bookkeeping (idle entries, busy ids,
//! connects in flight, queued waiters) lives behind a single mutex that is
//! never held across an `.await`; all I/O happens outside it.
//!
//! Capacity counts idle entries, busy entries and connects in flight, so
//! `max_connections` holds even while connections are being opened on a
//! multi-threaded runtime.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fb_client::instrumentation::SanitizationConfig;
use fb_client::{PoolKey, TargetDescriptor};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::factory::ConnectionFactory;
use crate::lifecycle::{EntryId, EntryState, PoolEntry};

/// A bounded pool of connections to one target.
///
/// Cloning is cheap and yields a handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = manager.pool(&target);
///
/// let rows = pool.execute_query("SELECT 1 AS x FROM RDB$DATABASE", &[]).await?;
///
/// let status = pool.status();
/// println!("Pool utilization: {:.1}%", status.utilization());
/// ```
#[derive(Clone)]
pub struct Pool {
    pub(crate) inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    key: PoolKey,
    target: TargetDescriptor,
    config: PoolConfig,
    factory: ConnectionFactory,
    pub(crate) sanitization: SanitizationConfig,

    /// Counter for generating entry ids.
    next_entry_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    state: Mutex<PoolState>,
    metrics: Mutex<PoolMetricsInner>,
}

#[derive(Default)]
struct PoolState {
    /// Idle entries, least recently used first.
    idle: Vec<PoolEntry>,
    /// Ids of entries currently checked out.
    busy: BTreeSet<EntryId>,
    /// Connects in flight that already hold a capacity slot.
    opening: usize,
    /// Callers waiting for an entry, oldest first.
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    closed: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.busy.len() + self.opening
    }

    /// Give `entry` to the oldest waiter that is still listening.
    ///
    /// Returns the entry if nobody took it.
    fn hand_off(&mut self, mut entry: PoolEntry) -> Option<PoolEntry> {
        entry.mark(EntryState::Busy);
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(Handoff::Entry(entry)) {
                Err(Handoff::Entry(returned)) => entry = returned,
                _ => {
                    tracing::trace!(waiter = waiter.id, "connection handed to waiter");
                    return None;
                }
            }
        }
        Some(entry)
    }

    /// Give a free capacity slot to the oldest waiter that is still listening.
    ///
    /// The slot is counted in `opening` on the waiter's behalf, so nobody
    /// arriving later can take it first.
    fn hand_off_slot(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.send(Handoff::Slot).is_ok() {
                self.opening += 1;
                tracing::trace!(waiter = waiter.id, "capacity slot handed to waiter");
                return;
            }
        }
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

/// What a queued waiter receives.
enum Handoff {
    /// A checked-out entry, already marked busy.
    Entry(PoolEntry),
    /// A capacity slot, already counted in `opening`; open a connection under it.
    Slot,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    acquire_timeouts: u64,
    entries_destroyed: u64,
    entries_reaped: u64,
    replacements_opened: u64,
    replacements_failed: u64,
}

enum Step {
    Ready(PoolEntry),
    Open,
    Wait(u64, oneshot::Receiver<Handoff>),
}

impl Pool {
    pub(crate) fn new(
        target: TargetDescriptor,
        config: PoolConfig,
        factory: ConnectionFactory,
        sanitization: SanitizationConfig,
    ) -> Self {
        let key = target.pool_key();
        tracing::info!(
            pool = %key,
            max = config.max_connections,
            "connection pool created"
        );

        Self {
            inner: Arc::new(PoolInner {
                key,
                target,
                config,
                factory,
                sanitization,
                next_entry_id: AtomicU64::new(1),
                created_at: Instant::now(),
                state: Mutex::new(PoolState::default()),
                metrics: Mutex::new(PoolMetricsInner::default()),
            }),
        }
    }

    /// Get a connection from the pool.
    ///
    /// Reuses an idle connection if there is one, opens a new one if the
    /// pool is under capacity, and otherwise queues behind earlier callers
    /// until a connection is released or the acquisition deadline passes.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        let result = self.acquire().await;

        let mut metrics = self.inner.metrics.lock();
        match &result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(_) => metrics.checkouts_failed += 1,
        }
        result
    }

    async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();

        let step = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }

            if let Some(mut entry) = state.idle.pop() {
                entry.mark(EntryState::Busy);
                state.busy.insert(entry.id());
                Step::Ready(entry)
            } else if state.waiters.is_empty()
                && state.total() < self.inner.config.max_connections
            {
                // Earlier callers still queued get any free slot first.
                state.opening += 1;
                Step::Open
            } else {
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, tx });
                tracing::debug!(
                    pool = %self.inner.key,
                    waiting = state.waiters.len(),
                    "pool saturated, queueing"
                );
                Step::Wait(id, rx)
            }
        };

        match step {
            Step::Ready(entry) => {
                tracing::trace!(entry = %entry.id(), "reusing idle connection");
                Ok(PooledConnection::new(entry, Arc::clone(&self.inner)))
            }
            Step::Open => self.open_reserved().await,
            Step::Wait(id, rx) => {
                let waiting = QueuedWaiter {
                    pool: Arc::clone(&self.inner),
                    id,
                    rx: Some(rx),
                };
                match waiting.wait(started).await? {
                    Handoff::Entry(entry) => {
                        Ok(PooledConnection::new(entry, Arc::clone(&self.inner)))
                    }
                    Handoff::Slot => self.open_reserved().await,
                }
            }
        }
    }

    /// Open a connection under a slot already counted in `opening`.
    async fn open_reserved(&self) -> Result<PooledConnection, PoolError> {
        let reservation = SlotReservation::reserved(&self.inner);
        let entry = self.inner.open_entry().await?;
        match reservation.fill(entry) {
            Ok(entry) => Ok(PooledConnection::new(entry, Arc::clone(&self.inner))),
            Err(entry) => {
                self.inner.close_entry(entry).await;
                Err(PoolError::PoolClosed)
            }
        }
    }

    /// Close and remove idle entries that have been idle for at least `timeout`.
    ///
    /// Returns how many entries were reaped. Teardown failures are logged
    /// and never stop the sweep.
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<PoolEntry> = {
            let mut state = self.inner.state.lock();
            let (expired, keep) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|entry| entry.metadata().idle_expired(now, timeout));
            state.idle = keep;
            expired
        };

        let count = expired.len();
        for entry in expired {
            tracing::debug!(pool = %self.inner.key, entry = %entry.id(), "reaping idle connection");
            self.inner.close_entry(entry).await;
        }

        if count > 0 {
            self.inner.metrics.lock().entries_reaped += count as u64;
        }
        count
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now, queued callers fail with
    /// [`PoolError::PoolClosed`], and busy connections are closed as they
    /// come back.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        // Dropping the senders wakes every waiter with a closed channel.
        drop(waiters);

        futures_util::future::join_all(
            idle.into_iter().map(|entry| self.inner.close_entry(entry)),
        )
        .await;

        tracing::info!(pool = %self.inner.key, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.busy.len(),
            opening: state.opening,
            waiting: state.waiters.len(),
            max: self.inner.config.max_connections,
        }
    }

    /// Ids of every entry the pool currently owns or has checked out.
    #[must_use]
    pub fn entry_ids(&self) -> Vec<EntryId> {
        let state = self.inner.state.lock();
        let mut ids: Vec<EntryId> = state
            .idle
            .iter()
            .map(PoolEntry::id)
            .chain(state.busy.iter().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            acquire_timeouts: inner.acquire_timeouts,
            entries_destroyed: inner.entries_destroyed,
            entries_reaped: inner.entries_reaped,
            replacements_opened: inner.replacements_opened,
            replacements_failed: inner.replacements_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// The target this pool connects to.
    #[must_use]
    pub fn target(&self) -> &TargetDescriptor {
        &self.inner.target
    }

    /// The registry key of this pool.
    #[must_use]
    pub fn key(&self) -> &PoolKey {
        &self.inner.key
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    async fn open_entry(&self) -> Result<PoolEntry, fb_client::Error> {
        let opened = self.factory.open(&self.target).await?;
        let id = EntryId(self.next_entry_id.fetch_add(1, Ordering::Relaxed));
        self.metrics.lock().connections_created += 1;
        tracing::debug!(pool = %self.key, entry = %id, "new connection added to pool");
        Ok(PoolEntry::new(id, opened))
    }

    async fn close_entry(&self, entry: PoolEntry) {
        entry.close().await;
        self.metrics.lock().connections_closed += 1;
    }

    /// Close `entry` in the background; without a runtime it is just dropped.
    fn spawn_close(self: &Arc<Self>, entry: PoolEntry) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                handle.spawn(async move { pool.close_entry(entry).await });
            }
            Err(_) => {
                tracing::warn!(entry = %entry.id(), "no runtime to close connection on, dropping it");
            }
        }
    }

    /// Return a healthy entry: straight to the oldest waiter, else to idle.
    fn release_entry(self: &Arc<Self>, entry: PoolEntry) {
        let id = entry.id();
        let mut state = self.state.lock();

        if state.closed {
            state.busy.remove(&id);
            drop(state);
            self.spawn_close(entry);
            return;
        }

        if let Some(mut entry) = state.hand_off(entry) {
            state.busy.remove(&id);
            entry.mark(EntryState::Idle);
            state.idle.push(entry);
            tracing::trace!(entry = %id, "connection returned to pool");
        }
    }

    /// Remove a failed entry, tear it down, and replace it if callers are queued.
    async fn destroy_entry(self: &Arc<Self>, entry: PoolEntry) {
        let id = entry.id();
        let replace = {
            let mut state = self.state.lock();
            state.busy.remove(&id);
            let replace = !state.closed
                && !state.waiters.is_empty()
                && state.total() < self.config.max_connections;
            if replace {
                state.opening += 1;
            }
            replace
        };
        let reservation = replace.then(|| SlotReservation::reserved(self));

        self.metrics.lock().entries_destroyed += 1;
        tracing::debug!(pool = %self.key, entry = %id, "destroying connection");
        self.close_entry(entry).await;

        let Some(reservation) = reservation else {
            return;
        };

        match self.open_entry().await {
            Ok(entry) => {
                self.metrics.lock().replacements_opened += 1;
                reservation.deliver(entry);
            }
            Err(err) => {
                // Dropping the reservation passes the slot to the oldest
                // waiter, which opens its own connection under it.
                self.metrics.lock().replacements_failed += 1;
                tracing::error!(pool = %self.key, error = %err, "failed to open replacement connection");
                drop(reservation);
            }
        }
    }

    /// Drop an entry whose state is unknown (its owner went away mid-use).
    fn discard_entry(self: &Arc<Self>, entry: PoolEntry) {
        {
            let mut state = self.state.lock();
            state.busy.remove(&entry.id());
            if !state.closed {
                state.hand_off_slot();
            }
        }
        self.metrics.lock().entries_destroyed += 1;
        tracing::warn!(pool = %self.key, entry = %entry.id(), "connection dropped mid-use, discarding");
        self.spawn_close(entry);
    }
}

/// A capacity slot taken for a connect in flight.
///
/// Dropping it unfilled passes the slot to the oldest waiter, or gives it
/// back to the pool if nobody is queued.
struct SlotReservation {
    pool: Arc<PoolInner>,
    armed: bool,
}

impl SlotReservation {
    /// Wrap a slot already counted in `opening`.
    fn reserved(pool: &Arc<PoolInner>) -> Self {
        Self {
            pool: Arc::clone(pool),
            armed: true,
        }
    }

    /// Turn the slot into a busy entry for the caller.
    ///
    /// Hands the entry back if the pool was closed meanwhile.
    fn fill(mut self, entry: PoolEntry) -> Result<PoolEntry, PoolEntry> {
        self.armed = false;
        let mut state = self.pool.state.lock();
        state.opening -= 1;
        if state.closed {
            return Err(entry);
        }
        state.busy.insert(entry.id());
        Ok(entry)
    }

    /// Turn the slot into an entry for the oldest waiter.
    fn deliver(mut self, entry: PoolEntry) {
        self.armed = false;
        let id = entry.id();
        let mut state = self.pool.state.lock();
        state.opening -= 1;

        if state.closed {
            drop(state);
            self.pool.spawn_close(entry);
            return;
        }

        state.busy.insert(id);
        if let Some(mut entry) = state.hand_off(entry) {
            // Every waiter gave up while the replacement was opening.
            state.busy.remove(&id);
            entry.mark(EntryState::Idle);
            state.idle.push(entry);
        }
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.pool.state.lock();
        state.opening -= 1;
        if !state.closed {
            state.hand_off_slot();
        }
    }
}

/// A caller queued for an entry.
///
/// If the caller goes away after an entry was already handed to it, the
/// entry goes back to the pool instead of being lost.
struct QueuedWaiter {
    pool: Arc<PoolInner>,
    id: u64,
    rx: Option<oneshot::Receiver<Handoff>>,
}

impl QueuedWaiter {
    /// Wait for a hand-off; the deadline counts from `started`, the
    /// beginning of the whole acquisition.
    async fn wait(mut self, started: Instant) -> Result<Handoff, PoolError> {
        let outcome = match (self.rx.as_mut(), self.pool.config.acquire_timeout) {
            (None, _) => return Err(PoolError::PoolClosed),
            (Some(rx), None) => Some(rx.await),
            (Some(rx), Some(timeout)) => tokio::time::timeout_at(started + timeout, rx).await.ok(),
        };

        // No more awaits below, so Drop has nothing left to clean up.
        let Some(mut rx) = self.rx.take() else {
            return Err(PoolError::PoolClosed);
        };

        match outcome {
            Some(received) => received.map_err(|_| PoolError::PoolClosed),
            None => {
                // Still queued means nobody served us; otherwise the hand-off
                // already happened under the lock and is sitting in `rx`.
                if self.pool.state.lock().remove_waiter(self.id) {
                    self.pool.metrics.lock().acquire_timeouts += 1;
                    tracing::debug!(pool = %self.pool.key, waited = ?started.elapsed(), "acquire timed out");
                    return Err(PoolError::AcquireTimeout {
                        waited: started.elapsed(),
                        target: self.pool.key.to_string(),
                    });
                }
                rx.try_recv().map_err(|_| PoolError::PoolClosed)
            }
        }
    }
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        // The caller was cancelled while queued.
        let mut state = self.pool.state.lock();
        if state.remove_waiter(self.id) {
            return;
        }
        drop(state);
        match rx.try_recv() {
            Ok(Handoff::Entry(entry)) => self.pool.release_entry(entry),
            Ok(Handoff::Slot) => {
                // Pass the slot on instead of leaving it counted for nobody.
                let mut state = self.pool.state.lock();
                state.opening -= 1;
                if !state.closed {
                    state.hand_off_slot();
                }
            }
            Err(_) => {}
        }
    }
}

/// A connection checked out of the pool.
///
/// Return it with [`release`](PooledConnection::release) when it is known
/// to be healthy, or [`destroy`](PooledConnection::destroy) it after a
/// failure. Dropping it returns it to the pool if no operation was in
/// flight, and discards it otherwise.
pub struct PooledConnection {
    entry: Option<PoolEntry>,
    pool: Arc<PoolInner>,
    in_flight: bool,
}

impl PooledConnection {
    fn new(entry: PoolEntry, pool: Arc<PoolInner>) -> Self {
        Self {
            entry: Some(entry),
            pool,
            in_flight: false,
        }
    }

    /// The entry id.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.entry.as_ref().map_or(EntryId(0), PoolEntry::id)
    }

    /// The checked-out entry.
    pub fn entry_mut(&mut self) -> Option<&mut PoolEntry> {
        self.entry.as_mut()
    }

    /// Mark whether the connection is in the middle of an operation whose
    /// outcome would leave it in an unknown state if abandoned.
    pub(crate) fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Return the connection to the pool, or to the oldest waiter.
    pub fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release_entry(entry);
        }
    }

    /// Remove the connection from the pool and close it.
    ///
    /// If callers are queued and the pool has room, a replacement is opened
    /// and handed to the oldest of them.
    pub async fn destroy(mut self) {
        if let Some(entry) = self.entry.take() {
            let pool = Arc::clone(&self.pool);
            pool.destroy_entry(entry).await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        if self.in_flight || entry.transaction.is_some() {
            self.pool.discard_entry(entry);
        } else {
            self.pool.release_entry(entry);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("entry", &self.entry)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Number of connections being opened.
    pub opening: usize,
    /// Number of callers queued for a connection.
    pub waiting: usize,
    /// Maximum allowed connections.
    pub max: usize,
}

impl PoolStatus {
    /// Total connections, counting ones being opened.
    #[must_use]
    pub fn total(&self) -> usize {
        self.idle + self.in_use + self.opening
    }

    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total() >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections opened since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (connect errors, timeouts, pool closed).
    pub checkouts_failed: u64,
    /// Checkouts that gave up waiting in the queue.
    pub acquire_timeouts: u64,
    /// Entries removed after a failure.
    pub entries_destroyed: u64,
    /// Idle entries closed by the reaper.
    pub entries_reaped: u64,
    /// Replacement connections opened for queued callers.
    pub replacements_opened: u64,
    /// Replacement connections that failed to open.
    pub replacements_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}
