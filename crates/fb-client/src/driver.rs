//! Capabilities a native client library has to provide.
//!
//! The pool only ever talks to a database through these traits. A driver
//! crate implements them on top of `fbclient`; `fb-testing` implements them
//! in memory.
//!
//! Teardown methods take `&mut self` and the handle is dropped by the caller
//! afterwards, whether or not teardown succeeded.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::Result;
use crate::row::Row;
use crate::transaction::TransactionOptions;
use crate::value::SqlValue;

/// Where a client library is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LibrarySource {
    /// An explicit path on the local filesystem.
    Path(PathBuf),
    /// Whatever the platform resolves by default (`libfbclient.so`,
    /// `fbclient.dll`, ...).
    PlatformDefault,
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::PlatformDefault => f.write_str("<platform default>"),
        }
    }
}

/// Loads a client library and instantiates client handles from it.
pub trait ClientLoader: Send + Sync + 'static {
    /// Instantiate a client handle backed by the library at `source`.
    fn load(&self, source: &LibrarySource) -> Result<Box<dyn Client>>;
}

/// A client handle: one instance of a loaded client library.
#[async_trait]
pub trait Client: Send {
    /// Set the credentials used by subsequent connects.
    fn set_default_credentials(&mut self, credentials: &Credentials);

    /// Open a connection to `uri`.
    async fn connect(&mut self, uri: &str) -> Result<Box<dyn Connection>>;

    /// Release the client handle.
    async fn dispose(&mut self) -> Result<()>;
}

/// An attached database connection.
#[async_trait]
pub trait Connection: Send {
    /// Start a transaction with the given options.
    async fn start_transaction(
        &mut self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>>;

    /// Execute `sql` with positional `params` inside `transaction`.
    async fn execute_query(
        &mut self,
        transaction: &mut dyn Transaction,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn Cursor>>;

    /// Detach from the database.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A started transaction.
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(&mut self) -> Result<()>;
}

/// An open result set.
#[async_trait]
pub trait Cursor: Send {
    /// Fetch every remaining row.
    async fn fetch_all(&mut self) -> Result<Vec<Row>>;

    /// Close the cursor.
    async fn close(&mut self) -> Result<()>;
}
