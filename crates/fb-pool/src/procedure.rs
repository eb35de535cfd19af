//! Stored-procedure calls that probe for a matching name and signature.
//!
//! Deployed databases often carry several generations of the same procedure:
//! renamed, or with parameters added over time. A [`ProcedureCall`] lists the
//! candidate names and parameter sets in preference order; each combination
//! is tried through the read-only executor until one is accepted.
//!
//! Only parameter-shape rejections move on to the next combination. Any other
//! failure ends the probe immediately.

use fb_client::instrumentation::span_names;
use fb_client::{Row, SqlValue, TargetDescriptor, validate_identifier};
use tracing::Instrument;

use crate::error::PoolError;
use crate::pool::Pool;
use crate::registry::PoolManager;

/// How a procedure is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcedureStyle {
    /// `SELECT * FROM NAME(?, ...)`, for procedures with a `SUSPEND` loop.
    #[default]
    Selectable,
    /// `EXECUTE PROCEDURE NAME ?, ...`, for procedures returning one row.
    Executable,
}

impl ProcedureStyle {
    /// Render the statement for `name` with `arity` placeholders.
    #[must_use]
    pub fn statement(self, name: &str, arity: usize) -> String {
        let placeholders = vec!["?"; arity].join(", ");
        match (self, arity) {
            (Self::Selectable, 0) => format!("SELECT * FROM {name}"),
            (Self::Selectable, _) => format!("SELECT * FROM {name}({placeholders})"),
            (Self::Executable, 0) => format!("EXECUTE PROCEDURE {name}"),
            (Self::Executable, _) => format!("EXECUTE PROCEDURE {name} {placeholders}"),
        }
    }
}

/// A procedure call with fallback names and parameter sets.
///
/// # Example
///
/// ```rust,ignore
/// use fb_driver_pool::ProcedureCall;
///
/// // Try the current signature first, then the legacy name and arity.
/// let call = ProcedureCall::new("SP_SALES_SUMMARY")
///     .or_name("SALES_SUMMARY")
///     .params(vec![region.into(), year.into()])
///     .params(vec![region.into()]);
///
/// let rows = manager.call_procedure(&target, &call).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    names: Vec<String>,
    param_sets: Vec<Vec<SqlValue>>,
    style: ProcedureStyle,
}

impl ProcedureCall {
    /// Start a call to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            param_sets: Vec::new(),
            style: ProcedureStyle::default(),
        }
    }

    /// Add a fallback name, tried after every earlier one.
    #[must_use]
    pub fn or_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Add a parameter set, tried after every earlier one.
    #[must_use]
    pub fn params(mut self, params: Vec<SqlValue>) -> Self {
        self.param_sets.push(params);
        self
    }

    /// Set how the procedure is invoked.
    #[must_use]
    pub fn style(mut self, style: ProcedureStyle) -> Self {
        self.style = style;
        self
    }

    /// Candidate names in preference order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Candidate parameter sets in preference order.
    #[must_use]
    pub fn param_sets(&self) -> &[Vec<SqlValue>] {
        &self.param_sets
    }

    /// Every `(statement, params)` combination, names outermost.
    ///
    /// Fails if there is nothing to try or a name is not a plain identifier.
    pub fn attempts(&self) -> Result<Vec<(String, &[SqlValue])>, PoolError> {
        if self.names.is_empty() {
            return Err(PoolError::NoProcedureCandidates("name"));
        }
        if self.param_sets.is_empty() {
            return Err(PoolError::NoProcedureCandidates("parameter set"));
        }

        let mut attempts = Vec::with_capacity(self.names.len() * self.param_sets.len());
        for name in &self.names {
            validate_identifier(name)?;
            for params in &self.param_sets {
                attempts.push((self.style.statement(name, params.len()), params.as_slice()));
            }
        }
        Ok(attempts)
    }
}

impl Pool {
    /// Call a procedure, trying each name and parameter set until one is accepted.
    ///
    /// If every combination is rejected for its parameter shape, the last
    /// rejection is returned.
    pub async fn call_procedure(&self, call: &ProcedureCall) -> Result<Vec<Row>, PoolError> {
        let attempts = call.attempts()?;
        let span = tracing::debug_span!(
            span_names::PROCEDURE,
            procedure = %call.names[0],
            candidates = attempts.len(),
        );

        async {
            let mut last_error = None;

            for (sql, params) in attempts {
                match self.execute_query(&sql, params).await {
                    Ok(rows) => return Ok(rows),
                    Err(err) if err.is_parameter_mismatch() => {
                        tracing::debug!(statement = %sql, error = %err, "procedure signature rejected, trying next");
                        last_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }

            Err(last_error.unwrap_or(PoolError::NoProcedureCandidates("name")))
        }
        .instrument(span)
        .await
    }
}

impl PoolManager {
    /// Call a procedure on `target` through its pool.
    pub async fn call_procedure(
        &self,
        target: &TargetDescriptor,
        call: &ProcedureCall,
    ) -> Result<Vec<Row>, PoolError> {
        self.pool(target).call_procedure(call).await
    }
}
