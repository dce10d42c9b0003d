use std::sync::Arc;

use tracing::{error, info};

use crate::config::{AppConfig, BackendKind};
use crate::error::AppError;
use crate::firestore::{FirestoreConfig, FirestoreHttpClient};
use crate::services::RecordStore;
use crate::store::{DocumentStore, SqliteStore};

/// The record store, or the reason it could not be brought up. Resolved
/// once at startup; an unavailable backend fails every call.
pub enum Backend {
    Ready(RecordStore),
    Unavailable(String),
}

impl Backend {
    pub async fn connect(config: &AppConfig) -> Self {
        match open_store(config).await {
            Ok(store) => {
                info!("using {} backend", store.backend_name());
                Backend::Ready(RecordStore::new(store, config.record_store.clone()))
            }
            Err(e) => {
                error!("backend unavailable: {}", e);
                Backend::Unavailable(e.to_string())
            }
        }
    }

    pub fn record_store(&self) -> Result<&RecordStore, AppError> {
        match self {
            Backend::Ready(store) => Ok(store),
            Backend::Unavailable(reason) => Err(AppError::BackendUnavailable(reason.clone())),
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>, AppError> {
    match config.backend {
        BackendKind::Sqlite => Ok(Arc::new(SqliteStore::connect(&config.database_url).await?)),
        BackendKind::Firestore => {
            let firestore = FirestoreConfig::new_from_env()?;
            Ok(Arc::new(FirestoreHttpClient::new(firestore)?))
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
}

impl AppState {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn ready(store: RecordStore) -> Self {
        Self::new(Backend::Ready(store))
    }
}
