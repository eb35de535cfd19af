//! Identifier validation for names spliced into SQL text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Validate an unquoted identifier (procedure name, table name, ...) to prevent SQL injection.
pub fn validate_identifier(name: &str) -> Result<()> {
    static IDENTIFIER_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_$]{0,62}$").unwrap());

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{}': must start with a letter, \
             contain only alphanumerics/_/$, and be 1-63 characters",
            name
        )));
    }

    Ok(())
}
