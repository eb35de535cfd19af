//! Tracing helpers for database operations.
//!
//! Spans and fields follow the OpenTelemetry database semantic conventions
//! so a `tracing-opentelemetry` layer can export them unchanged:
//!
//! - `db.system`: "firebird"
//! - `db.name`: Database path or alias
//! - `db.statement`: SQL statement, sanitized
//! - `db.operation`: Statement kind (SELECT, EXECUTE PROCEDURE, ...)
//! - `server.address` / `server.port`: Remote endpoint, empty for embedded

use tracing::Span;

use crate::config::TargetDescriptor;

/// Database system identifier for Firebird.
pub const DB_SYSTEM: &str = "firebird";

/// Span names for database operations.
pub mod span_names {
    /// Span name for connection establishment.
    pub const CONNECT: &str = "firebird.connect";
    /// Span name for a pooled query (acquire through release).
    pub const QUERY: &str = "firebird.query";
    /// Span name for a procedure probe.
    pub const PROCEDURE: &str = "firebird.procedure";
    /// Span name for an idle sweep.
    pub const REAP: &str = "firebird.reap";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to replace literals.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that records statements verbatim.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace string and numeric literals with a placeholder.
///
/// Quoted identifiers (`"NAME"`) are Firebird syntax for names, not values,
/// and are kept.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // Consume through the closing quote; '' is an escaped quote.
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                result.push_str(placeholder);
            }
            '"' => {
                result.push(c);
                for inner in chars.by_ref() {
                    result.push(inner);
                    if inner == '"' {
                        break;
                    }
                }
            }
            c if c.is_ascii_digit()
                && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_' || ch == '$') =>
            {
                while chars
                    .peek()
                    .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
                {
                    chars.next();
                }
                result.push_str(placeholder);
            }
            c => result.push(c),
        }
    }

    result
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let sql_upper = sql.trim_start().to_uppercase();

    if sql_upper.starts_with("SELECT") || sql_upper.starts_with("WITH") {
        "SELECT"
    } else if sql_upper.starts_with("EXECUTE PROCEDURE") {
        "EXECUTE PROCEDURE"
    } else if sql_upper.starts_with("EXECUTE BLOCK") {
        "EXECUTE BLOCK"
    } else if sql_upper.starts_with("INSERT") {
        "INSERT"
    } else if sql_upper.starts_with("UPDATE") {
        "UPDATE"
    } else if sql_upper.starts_with("DELETE") {
        "DELETE"
    } else {
        "OTHER"
    }
}

/// Create a span for one pooled query against `target`.
#[must_use]
pub fn query_span(target: &TargetDescriptor, sql: &str, sanitization: &SanitizationConfig) -> Span {
    tracing::debug_span!(
        span_names::QUERY,
        db.system = DB_SYSTEM,
        db.name = target.database(),
        db.operation = extract_operation(sql),
        db.statement = %sanitization.sanitize(sql),
        server.address = target.host().unwrap_or_default(),
        server.port = target.port(),
    )
}
