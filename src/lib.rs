use std::sync::Arc;

// Public modules
pub mod config;
pub mod domains;
pub mod errors;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use domains::store::{LocalStore, SqliteLocalStore};
pub use domains::sync::{GalleryService, SyncDrainer};

use domains::sync::remote::{ApiRemoteStore, RemoteStore};
use domains::sync::uploader::{HttpMediaUploader, MediaUploader};
use errors::{DbError, DomainError, ServiceError, ServiceResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Build a ready-to-use [`GalleryService`] over a SQLite cache at `db_path`.
/// An unconfigured remote in `config` means the service runs local-only;
/// an unconfigured uploader makes every upload fail into the embedded
/// placeholder path. Both degrade, neither is an error here.
pub async fn initialize(db_path: &str, config: AppConfig) -> ServiceResult<GalleryService> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| ServiceError::Domain(DomainError::Database(DbError::Sqlx(e))))?;

    let store = Arc::new(
        SqliteLocalStore::initialize(pool)
            .await
            .map_err(|e| ServiceError::Domain(DomainError::Database(e)))?,
    );

    let remote: Option<Arc<dyn RemoteStore>> = if config.remote.is_configured() {
        Some(Arc::new(ApiRemoteStore::new(&config.remote)))
    } else {
        log::info!("no remote store configured, running local-only");
        None
    };
    let uploader: Arc<dyn MediaUploader> = Arc::new(HttpMediaUploader::new(&config.uploader));

    Ok(GalleryService::new(store, remote, uploader))
}
