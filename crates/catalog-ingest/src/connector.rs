//! Store session setup
//!
//! A [`Session`] only exists once the store has answered a ping; building a
//! client alone is not enough to report success.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::store::{self, redact_uri, DocumentStore, StoreError, StoreTarget};

/// Outcome of [`connect`]
pub type ConnectResult = Result<Session, StoreError>;

/// A live handle on the destination collection
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn DocumentStore>,
    pub database: String,
    pub collection: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.store.backend())
            .field("database", &self.database)
            .field("collection", &self.collection)
            .finish()
    }
}

impl Session {
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Release the underlying client or pool
    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Open the backend for the target's scheme and ping it
#[instrument(skip_all, fields(uri = %redact_uri(&target.uri), collection = %target.collection))]
pub async fn connect(target: &StoreTarget) -> ConnectResult {
    let store = store::open(target).await?;
    attach(store, target).await
}

/// Wrap an already-built store, still requiring a successful ping
pub async fn attach(store: Arc<dyn DocumentStore>, target: &StoreTarget) -> ConnectResult {
    if let Err(e) = store.ping().await {
        warn!(backend = store.backend(), error = %e, "Store did not answer ping");
        store.close().await;
        return Err(match e {
            StoreError::Connection(reason) => StoreError::Connection(reason),
            other => StoreError::Connection(other.to_string()),
        });
    }

    info!(
        backend = store.backend(),
        database = %target.database,
        collection = %target.collection,
        "Connected to document store"
    );

    Ok(Session {
        store,
        database: target.database.clone(),
        collection: target.collection.clone(),
    })
}
