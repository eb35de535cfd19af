//! Read-only transactional query execution.
//!
//! Every query runs on a pooled connection inside its own read-only,
//! read-committed, record-version transaction:
//!
//! 1. acquire a connection (possibly queueing)
//! 2. start the transaction and record it on the entry
//! 3. execute, fetch every row, close the cursor
//! 4. commit and return the connection to the pool
//!
//! On any failure the transaction is rolled back (rollback failures are
//! swallowed), the connection is destroyed rather than reused, and the
//! original error is returned.

use fb_client::instrumentation;
use fb_client::{Row, SqlValue, TargetDescriptor, TransactionOptions};
use tracing::Instrument;

use crate::error::PoolError;
use crate::lifecycle::PoolEntry;
use crate::pool::Pool;
use crate::registry::PoolManager;

impl Pool {
    /// Run `sql` with positional `params` and return every row.
    pub async fn execute_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, PoolError> {
        let span = instrumentation::query_span(self.target(), sql, &self.inner.sanitization);

        async {
            let mut conn = self.get().await?;
            let entry_id = conn.id();

            conn.set_in_flight(true);
            let outcome = match conn.entry_mut() {
                Some(entry) => run_read_only(entry, sql, params).await,
                None => return Err(PoolError::PoolClosed),
            };

            match outcome {
                Ok(rows) => {
                    conn.set_in_flight(false);
                    conn.release();
                    tracing::debug!(entry = %entry_id, rows = rows.len(), "query complete");
                    Ok(rows)
                }
                Err(err) => {
                    tracing::debug!(entry = %entry_id, error = %err, "query failed, discarding connection");
                    if let Some(entry) = conn.entry_mut() {
                        entry.rollback_quietly().await;
                    }
                    conn.destroy().await;
                    Err(err.into())
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl PoolManager {
    /// Run `sql` against `target` through its pool.
    ///
    /// The pool is created on first use.
    pub async fn execute_query(
        &self,
        target: &TargetDescriptor,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Row>, PoolError> {
        self.pool(target).execute_query(sql, params).await
    }
}

/// Steps 2 and 3 of a pooled query, on an entry the caller already owns.
///
/// The open transaction stays recorded on the entry until commit succeeds,
/// so the caller can roll it back on failure.
async fn run_read_only(
    entry: &mut PoolEntry,
    sql: &str,
    params: &[SqlValue],
) -> fb_client::Result<Vec<Row>> {
    let PoolEntry {
        connection,
        transaction,
        ..
    } = entry;

    let tx = transaction.insert(
        connection
            .start_transaction(TransactionOptions::read_only())
            .await?,
    );

    let mut cursor = connection.execute_query(tx.as_mut(), sql, params).await?;
    let fetched = cursor.fetch_all().await;
    let closed = cursor.close().await;
    let rows = fetched?;
    closed?;

    tx.commit().await?;
    *transaction = None;

    Ok(rows)
}
