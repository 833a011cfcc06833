use std::collections::HashSet;

use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{query, query_scalar, SqlitePool};
use tokio::sync::broadcast;

use crate::domains::artwork::{Artwork, ArtworkDoc, UpdateArtwork};
use crate::domains::student::{Student, StudentDoc, UpdateStudent};
use crate::errors::{DbError, DbResult, DomainResult};
use crate::types::Collection;

// Versioned storage keys. A future schema change gets a new key instead of
// silently corrupting data written under the old one.
const STUDENTS_KEY: &str = "gallery_students_local_v1";
const ARTWORKS_KEY: &str = "gallery_artworks_local_v1";
const STUDENTS_DELETED_KEY: &str = "gallery_students_deleted_v1";
const ARTWORKS_DELETED_KEY: &str = "gallery_artworks_deleted_v1";

fn tombstones_key(collection: Collection) -> &'static str {
    match collection {
        Collection::Students => STUDENTS_DELETED_KEY,
        Collection::Artworks => ARTWORKS_DELETED_KEY,
    }
}

/// Everything the local cache holds.
#[derive(Debug, Clone, Default)]
pub struct LocalData {
    pub students: Vec<Student>,
    pub artworks: Vec<Artwork>,
}

/// The two tombstone sets.
#[derive(Debug, Clone, Default)]
pub struct DeletedIds {
    pub students: HashSet<String>,
    pub artworks: HashSet<String>,
}

impl DeletedIds {
    pub fn for_collection(&self, collection: Collection) -> &HashSet<String> {
        match collection {
            Collection::Students => &self.students,
            Collection::Artworks => &self.artworks,
        }
    }
}

/// Emitted on every successful write so independent views (other windows,
/// background tasks) can re-apply the local snapshot without polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Records(Collection),
    Tombstones(Collection),
}

/// Durable key-value persistence for the two record collections and the two
/// tombstone sets. Pure storage plus sanitization on every write path; no
/// merge logic lives here.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load(&self) -> DomainResult<LocalData>;
    async fn load_students(&self) -> DomainResult<Vec<Student>>;
    async fn load_artworks(&self) -> DomainResult<Vec<Artwork>>;
    async fn save_students(&self, items: &[Student]) -> DomainResult<()>;
    async fn save_artworks(&self, items: &[Artwork]) -> DomainResult<()>;

    /// Sanitize and front-insert a student, generating an id if absent.
    async fn add_student(&self, doc: StudentDoc) -> DomainResult<Student>;
    /// Apply a partial update; `id` and `createdAt` are never changed.
    async fn update_student(&self, id: &str, updates: &UpdateStudent)
        -> DomainResult<Vec<Student>>;
    /// Remove a student and every artwork referencing it.
    async fn remove_student(&self, id: &str) -> DomainResult<LocalData>;

    async fn add_artwork(&self, doc: ArtworkDoc) -> DomainResult<Artwork>;
    async fn update_artwork(&self, id: &str, updates: &UpdateArtwork)
        -> DomainResult<Vec<Artwork>>;
    async fn remove_artwork(&self, id: &str) -> DomainResult<Vec<Artwork>>;

    async fn load_tombstones(&self) -> DomainResult<DeletedIds>;
    /// Idempotent: marking an already-marked id is a no-op.
    async fn mark_deleted(&self, collection: Collection, id: &str) -> DomainResult<()>;
    /// Idempotent: clearing an absent id is a no-op.
    async fn clear_deleted(&self, collection: Collection, id: &str) -> DomainResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// SQLite-backed implementation over a single key-value table.
pub struct SqliteLocalStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteLocalStore {
    /// Create the backing table if needed and return a ready store.
    pub async fn initialize(pool: SqlitePool) -> DbResult<Self> {
        query(
            "CREATE TABLE IF NOT EXISTS gallery_kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        let (events, _) = broadcast::channel(32);
        Ok(Self { pool, events })
    }

    /// Read a JSON list. Missing or corrupt storage yields the empty list:
    /// a cache that cannot be read is a cache that is empty.
    async fn read_list<T: DeserializeOwned>(&self, key: &str) -> DomainResult<Vec<T>> {
        let raw: Option<String> = query_scalar("SELECT value FROM gallery_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        match raw {
            None => Ok(Vec::new()),
            Some(raw) => match serde_json::from_str::<Vec<T>>(&raw) {
                Ok(items) => Ok(items),
                Err(err) => {
                    warn!("discarding corrupt list under {}: {}", key, err);
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn write_list<T: Serialize>(
        &self,
        key: &str,
        items: &[T],
        event: StoreEvent,
    ) -> DomainResult<()> {
        let raw = serde_json::to_string(items).map_err(DbError::from)?;
        query(
            "INSERT INTO gallery_kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        let _ = self.events.send(event);
        Ok(())
    }

    async fn read_id_list(&self, key: &str) -> DomainResult<Vec<String>> {
        self.read_list::<String>(key).await
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn load(&self) -> DomainResult<LocalData> {
        Ok(LocalData {
            students: self.read_list(STUDENTS_KEY).await?,
            artworks: self.read_list(ARTWORKS_KEY).await?,
        })
    }

    async fn load_students(&self) -> DomainResult<Vec<Student>> {
        self.read_list(STUDENTS_KEY).await
    }

    async fn load_artworks(&self) -> DomainResult<Vec<Artwork>> {
        self.read_list(ARTWORKS_KEY).await
    }

    async fn save_students(&self, items: &[Student]) -> DomainResult<()> {
        // Records are canonical by construction; serializing through
        // StudentDoc re-applies the sanitized shape.
        self.write_list(STUDENTS_KEY, items, StoreEvent::Records(Collection::Students))
            .await
    }

    async fn save_artworks(&self, items: &[Artwork]) -> DomainResult<()> {
        self.write_list(ARTWORKS_KEY, items, StoreEvent::Records(Collection::Artworks))
            .await
    }

    async fn add_student(&self, doc: StudentDoc) -> DomainResult<Student> {
        let entry = Student::from(doc);
        let mut students = self.load_students().await?;
        students.insert(0, entry.clone());
        self.save_students(&students).await?;
        Ok(entry)
    }

    async fn update_student(
        &self,
        id: &str,
        updates: &UpdateStudent,
    ) -> DomainResult<Vec<Student>> {
        let mut students = self.load_students().await?;
        for student in students.iter_mut() {
            if student.id == id {
                *student = updates.apply(student);
            }
        }
        self.save_students(&students).await?;
        Ok(students)
    }

    async fn remove_student(&self, id: &str) -> DomainResult<LocalData> {
        let data = self.load().await?;
        let students: Vec<Student> = data
            .students
            .into_iter()
            .filter(|student| student.id != id)
            .collect();
        let artworks: Vec<Artwork> = data
            .artworks
            .into_iter()
            .filter(|artwork| artwork.student_id != id)
            .collect();
        self.save_students(&students).await?;
        self.save_artworks(&artworks).await?;
        Ok(LocalData { students, artworks })
    }

    async fn add_artwork(&self, doc: ArtworkDoc) -> DomainResult<Artwork> {
        let entry = Artwork::from(doc);
        let mut artworks = self.load_artworks().await?;
        artworks.insert(0, entry.clone());
        self.save_artworks(&artworks).await?;
        Ok(entry)
    }

    async fn update_artwork(
        &self,
        id: &str,
        updates: &UpdateArtwork,
    ) -> DomainResult<Vec<Artwork>> {
        let mut artworks = self.load_artworks().await?;
        for artwork in artworks.iter_mut() {
            if artwork.id == id {
                *artwork = updates.apply(artwork);
            }
        }
        self.save_artworks(&artworks).await?;
        Ok(artworks)
    }

    async fn remove_artwork(&self, id: &str) -> DomainResult<Vec<Artwork>> {
        let artworks: Vec<Artwork> = self
            .load_artworks()
            .await?
            .into_iter()
            .filter(|artwork| artwork.id != id)
            .collect();
        self.save_artworks(&artworks).await?;
        Ok(artworks)
    }

    async fn load_tombstones(&self) -> DomainResult<DeletedIds> {
        Ok(DeletedIds {
            students: self
                .read_id_list(STUDENTS_DELETED_KEY)
                .await?
                .into_iter()
                .collect(),
            artworks: self
                .read_id_list(ARTWORKS_DELETED_KEY)
                .await?
                .into_iter()
                .collect(),
        })
    }

    async fn mark_deleted(&self, collection: Collection, id: &str) -> DomainResult<()> {
        if id.is_empty() {
            return Ok(());
        }
        let key = tombstones_key(collection);
        let mut ids = self.read_id_list(key).await?;
        if !ids.iter().any(|existing| existing.as_str() == id) {
            ids.push(id.to_string());
            self.write_list(key, &ids, StoreEvent::Tombstones(collection))
                .await?;
        }
        Ok(())
    }

    async fn clear_deleted(&self, collection: Collection, id: &str) -> DomainResult<()> {
        if id.is_empty() {
            return Ok(());
        }
        let key = tombstones_key(collection);
        let ids = self.read_id_list(key).await?;
        if ids.iter().any(|existing| existing.as_str() == id) {
            let remaining: Vec<String> = ids
                .into_iter()
                .filter(|existing| existing.as_str() != id)
                .collect();
            self.write_list(key, &remaining, StoreEvent::Tombstones(collection))
                .await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
