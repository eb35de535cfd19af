//! Opens physical connections for a target.

use std::sync::Arc;

use fb_client::{Client, ClientLoader, Connection, Error, LibrarySource, TargetDescriptor};
use tracing::Instrument;

/// A freshly opened client handle and its connection.
pub(crate) struct Opened {
    pub(crate) client: Box<dyn Client>,
    pub(crate) connection: Box<dyn Connection>,
}

/// Loads a client library and opens one connection per call.
#[derive(Clone)]
pub struct ConnectionFactory {
    loader: Arc<dyn ClientLoader>,
}

impl ConnectionFactory {
    /// Create a factory backed by `loader`.
    pub fn new(loader: Arc<dyn ClientLoader>) -> Self {
        Self { loader }
    }

    /// Library locations to try for `target`, in priority order.
    ///
    /// The override path is only a candidate if it exists on disk; the
    /// platform default always is.
    #[must_use]
    pub fn candidates(target: &TargetDescriptor) -> Vec<LibrarySource> {
        let mut candidates = Vec::with_capacity(2);

        if let Some(path) = target.client_library() {
            if path.exists() {
                candidates.push(LibrarySource::Path(path.to_path_buf()));
            } else {
                tracing::debug!(
                    path = %path.display(),
                    "client library override not found, skipping"
                );
            }
        }

        candidates.push(LibrarySource::PlatformDefault);
        candidates
    }

    /// Instantiate a client from the first candidate that loads.
    ///
    /// When every candidate fails, the last failure is returned.
    fn load_client(&self, target: &TargetDescriptor) -> Result<Box<dyn Client>, Error> {
        let mut last_error = None;

        for source in Self::candidates(target) {
            match self.loader.load(&source) {
                Ok(client) => {
                    tracing::debug!(library = %source, "client library loaded");
                    return Ok(client);
                }
                Err(err) => {
                    tracing::warn!(library = %source, error = %err, "client library failed to load");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(Error::NoClientLibrary))
    }

    /// Open a new connection to `target`.
    ///
    /// If the connect fails, the client handle is disposed before the
    /// connect error is returned.
    pub(crate) async fn open(&self, target: &TargetDescriptor) -> Result<Opened, Error> {
        let uri = target.connection_uri();
        let span = tracing::debug_span!(
            fb_client::instrumentation::span_names::CONNECT,
            db.system = fb_client::instrumentation::DB_SYSTEM,
            db.name = target.database(),
            server.address = target.host().unwrap_or_default(),
            server.port = target.port(),
        );

        async {
            let mut client = self.load_client(target)?;
            client.set_default_credentials(&target.credentials());

            match client.connect(&uri).await {
                Ok(connection) => {
                    tracing::debug!("connection opened");
                    Ok(Opened { client, connection })
                }
                Err(err) => {
                    tracing::debug!(error = %err, "connect failed, disposing client");
                    if let Err(dispose_err) = client.dispose().await {
                        tracing::warn!(error = %dispose_err, "failed to dispose client after connect failure");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory").finish_non_exhaustive()
    }
}
