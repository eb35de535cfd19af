//! Target descriptors and credentials.

use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default Firebird server port.
pub const DEFAULT_PORT: u16 = 3050;

/// Default Firebird superuser.
pub const DEFAULT_USER: &str = "SYSDBA";

const KEY_SEPARATOR: char = '|';

/// `host/port:path` shorthand accepted in the `Database` option.
static REMOTE_DATABASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^/:\\]+)/(\d{1,5}):(.+)$").unwrap());

/// Credentials applied to a client handle before it connects.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// SQL role, if any.
    pub role: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Canonical identity of a target, used as the pool registry key.
///
/// Two descriptors produce the same key iff host, port, database, user,
/// role and client-library override are equal. The password is not part
/// of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(String);

impl PoolKey {
    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote (or embedded) database endpoint plus credentials.
///
/// Descriptors are immutable: the `with_*` methods consume `self` and
/// return a new value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetDescriptor {
    #[serde(default)]
    host: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    database: String,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default, skip_serializing)]
    password: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    client_library: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

impl TargetDescriptor {
    /// Create a descriptor for a local/embedded database path.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            database: database.into(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            role: None,
            client_library: None,
        }
    }

    /// Parse a `key=value;` connection string.
    ///
    /// ```text
    /// Host=db.internal;Port=3050;Database=/data/sales.fdb;User=REPORTS;Password=secret;
    /// Database=db.internal/3051:/data/sales.fdb;User=REPORTS;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut target = Self::new(String::new());

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" | "datasource" | "data source" => {
                    target = target.with_host(value);
                }
                "port" => {
                    target.port = parse_port(value)?;
                }
                "database" | "initial catalog" => {
                    if let Some(caps) = REMOTE_DATABASE_RE.captures(value) {
                        target = target.with_host(&caps[1]);
                        target.port = parse_port(&caps[2])?;
                        target.database = caps[3].to_string();
                    } else {
                        target.database = value.to_string();
                    }
                }
                "user" | "user id" | "uid" => {
                    target.user = value.to_string();
                }
                "password" | "pwd" => {
                    target.password = value.to_string();
                }
                "role" => {
                    target = target.with_role(value);
                }
                "clientlibrary" | "client library" => {
                    target = target.with_client_library(value);
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        target.ensure_database()?;
        Ok(target)
    }

    /// Build a descriptor from `FIREBIRD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Build a descriptor from a variable lookup function.
    ///
    /// Reads `FIREBIRD_HOST`, `FIREBIRD_PORT`, `FIREBIRD_DATABASE`,
    /// `FIREBIRD_USER`, `FIREBIRD_PASSWORD`, `FIREBIRD_ROLE` and
    /// `FIREBIRD_CLIENT_LIBRARY`. Only the database is required.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database = lookup("FIREBIRD_DATABASE")
            .ok_or_else(|| Error::Config("FIREBIRD_DATABASE is not set".into()))?;

        let mut target = Self::new(database);
        if let Some(host) = lookup("FIREBIRD_HOST") {
            target = target.with_host(host);
        }
        if let Some(port) = lookup("FIREBIRD_PORT") {
            target.port = parse_port(&port)?;
        }
        if let Some(user) = lookup("FIREBIRD_USER") {
            target.user = user;
        }
        if let Some(password) = lookup("FIREBIRD_PASSWORD") {
            target.password = password;
        }
        if let Some(role) = lookup("FIREBIRD_ROLE") {
            target = target.with_role(role);
        }
        if let Some(library) = lookup("FIREBIRD_CLIENT_LIBRARY") {
            target = target.with_client_library(library);
        }

        target.ensure_database()?;
        Ok(target)
    }

    /// Set the server host. An empty host means a local/embedded target.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = non_empty(host.into());
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the SQL role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = non_empty(role.into());
        self
    }

    /// Set an explicit client-library path to try before the platform default.
    #[must_use]
    pub fn with_client_library(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.client_library = (!path.as_os_str().is_empty()).then_some(path);
        self
    }

    /// Server host, `None` for a local/embedded target.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    /// Server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Database path or alias.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// SQL role.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref().filter(|r| !r.is_empty())
    }

    /// Client-library override path.
    #[must_use]
    pub fn client_library(&self) -> Option<&Path> {
        self.client_library
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Credentials to apply to a client handle.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            password: self.password.clone(),
            role: self.role().map(str::to_string),
        }
    }

    /// The URI handed to the client library's connect call.
    ///
    /// `host/port:database` for a remote target, the bare database path
    /// otherwise.
    #[must_use]
    pub fn connection_uri(&self) -> String {
        match self.host() {
            Some(host) => format!("{host}/{}:{}", self.port, self.database),
            None => self.database.clone(),
        }
    }

    /// The registry key for this descriptor.
    ///
    /// Fields are joined in a fixed order; absent optional fields become an
    /// empty placeholder and separators inside values are escaped, so the
    /// mapping from equivalence class to key is total and injective.
    #[must_use]
    pub fn pool_key(&self) -> PoolKey {
        let port = self.port.to_string();
        let fields = [
            self.host().unwrap_or_default(),
            port.as_str(),
            self.database.as_str(),
            self.user.as_str(),
            self.role().unwrap_or_default(),
        ];

        let mut key = String::new();
        for field in fields {
            escape_into(&mut key, field);
            key.push(KEY_SEPARATOR);
        }
        if let Some(library) = self.client_library() {
            escape_path_into(&mut key, library);
        }
        PoolKey(key)
    }

    /// Whether two descriptors share a pool.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.pool_key() == other.pool_key()
    }

    fn ensure_database(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::Config("database path is required".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("client_library", &self.client_library)
            .finish()
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {value}")))
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == '\\' || c == KEY_SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Like [`escape_into`], with bytes that are not UTF-8 written as `\xNN`.
///
/// A literal backslash is always doubled, so `\x` only ever comes from a raw byte.
fn escape_path_into(out: &mut String, path: &Path) {
    for chunk in path.as_os_str().as_encoded_bytes().utf8_chunks() {
        escape_into(out, chunk.valid());
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
}
