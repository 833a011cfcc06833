pub mod repository;

pub use repository::{DeletedIds, LocalData, LocalStore, SqliteLocalStore, StoreEvent};
