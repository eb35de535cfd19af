//! Per-target pool registry.

use std::collections::HashMap;
use std::sync::Arc;

use fb_client::instrumentation::{SanitizationConfig, span_names};
use fb_client::{ClientLoader, PoolKey, TargetDescriptor};
use parking_lot::Mutex;
use tracing::Instrument;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::factory::ConnectionFactory;
use crate::pool::Pool;
use crate::reaper::Reaper;

/// Owns one [`Pool`] per distinct target and the idle reaper that sweeps them.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Example
///
/// ```rust,ignore
/// use fb_driver_pool::{PoolConfig, PoolManager};
///
/// let manager = PoolManager::new(loader, PoolConfig::from_env()?)?;
/// manager.start_reaper();
///
/// let rows = manager
///     .execute_query(&target, "SELECT 1 AS x FROM RDB$DATABASE", &[])
///     .await?;
///
/// manager.close_all().await;
/// ```
#[derive(Clone)]
pub struct PoolManager {
    pub(crate) inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    config: PoolConfig,
    factory: ConnectionFactory,
    sanitization: SanitizationConfig,
    pools: Mutex<HashMap<PoolKey, Pool>>,
    reaper: Mutex<Option<Reaper>>,
}

impl PoolManager {
    /// Create a registry whose pools load client libraries through `loader`.
    pub fn new(loader: Arc<dyn ClientLoader>, config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_sanitization(loader, config, SanitizationConfig::default())
    }

    /// Create a registry that records statements with the given sanitization.
    pub fn with_sanitization(
        loader: Arc<dyn ClientLoader>,
        config: PoolConfig,
        sanitization: SanitizationConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                factory: ConnectionFactory::new(loader),
                sanitization,
                pools: Mutex::new(HashMap::new()),
                reaper: Mutex::new(None),
            }),
        })
    }

    /// The pool for `target`, created on first use.
    ///
    /// Equivalent targets always get the same pool.
    #[must_use]
    pub fn pool(&self, target: &TargetDescriptor) -> Pool {
        let key = target.pool_key();
        let mut pools = self.inner.pools.lock();

        pools
            .entry(key)
            .or_insert_with(|| {
                Pool::new(
                    target.clone(),
                    self.inner.config.clone(),
                    self.inner.factory.clone(),
                    self.inner.sanitization.clone(),
                )
            })
            .clone()
    }

    /// Snapshot of every registered pool.
    #[must_use]
    pub fn pools(&self) -> Vec<Pool> {
        self.inner.pools.lock().values().cloned().collect()
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pools.lock().len()
    }

    /// Whether no pool has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.pools.lock().is_empty()
    }

    /// The configuration every pool is created with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Close idle entries older than the configured idle timeout in every pool.
    ///
    /// Returns how many entries were closed.
    pub async fn sweep_idle(&self) -> usize {
        let span = tracing::debug_span!(span_names::REAP, pools = tracing::field::Empty);

        async {
            let pools = self.pools();
            tracing::Span::current().record("pools", pools.len());

            let mut reaped = 0;
            for pool in pools {
                reaped += pool.reap_idle(self.inner.config.idle_timeout).await;
            }

            if reaped > 0 {
                tracing::info!(reaped, "closed idle connections");
            }
            reaped
        }
        .instrument(span)
        .await
    }

    /// Start the periodic idle reaper.
    ///
    /// Returns `false` if it is already running. Must be called from within
    /// a Tokio runtime.
    pub fn start_reaper(&self) -> bool {
        let mut reaper = self.inner.reaper.lock();
        if reaper.is_some() {
            return false;
        }

        *reaper = Some(Reaper::spawn(
            Arc::downgrade(&self.inner),
            self.inner.config.reap_interval,
        ));
        tracing::info!(interval = ?self.inner.config.reap_interval, "idle reaper started");
        true
    }

    /// Whether the periodic reaper is running.
    #[must_use]
    pub fn reaper_running(&self) -> bool {
        self.inner.reaper.lock().is_some()
    }

    /// Stop the reaper and close every pool.
    ///
    /// The registry is empty afterwards; later calls create fresh pools.
    pub async fn close_all(&self) {
        let reaper = self.inner.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }

        let pools: Vec<Pool> = self.inner.pools.lock().drain().map(|(_, pool)| pool).collect();
        let count = pools.len();
        futures_util::future::join_all(pools.iter().map(Pool::close)).await;

        tracing::info!(pools = count, "all connection pools closed");
    }
}

impl ManagerInner {
    pub(crate) fn handle(self: Arc<Self>) -> PoolManager {
        PoolManager { inner: self }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.inner.config)
            .field("pools", &self.len())
            .field("reaper_running", &self.reaper_running())
            .finish()
    }
}
