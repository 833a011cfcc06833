use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::{debug, warn};
use serde_json::json;
use tokio::sync::broadcast;

use crate::domains::artwork::{Artwork, ArtworkDoc, ArtworkMedia, NewArtwork};
use crate::domains::reconcile::{filter_deleted, merge_by_id, sort_newest_first};
use crate::domains::store::{DeletedIds, LocalData, LocalStore};
use crate::domains::student::{NewStudent, Student, StudentDoc, UpdateStudent};
use crate::domains::sync::drainer::{DrainSummary, SyncDrainer};
use crate::domains::sync::remote::{RemoteDoc, RemoteStore};
use crate::domains::sync::uploader::{MediaBlob, MediaType, MediaUploader, ProgressFn};
use crate::errors::{DomainError, ServiceError, ServiceResult, SyncError, SyncResult};
use crate::types::{generate_record_id, now_millis, Collection};
use crate::validation::Validate;

const DEFAULT_ARTWORK_TITLE: &str = "Untitled";

/// Where a write ended up. `Local` means "saved locally, will sync later".
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome<T> {
    Cloud(T),
    Local(T),
}

impl<T> SaveOutcome<T> {
    pub fn record(&self) -> &T {
        match self {
            SaveOutcome::Cloud(record) | SaveOutcome::Local(record) => record,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SaveOutcome::Local(_))
    }
}

/// Aggregate outcome of a batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSaveSummary {
    pub cloud: u32,
    pub local: u32,
}

/// Outcome of a delete. `LocalHidden` means the record is gone from every
/// local view but may still exist remotely; the tombstone keeps hiding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    CloudConfirmed,
    LocalHidden,
}

/// Emitted whenever a collection's presented view changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEvent {
    Refreshed(Collection),
}

/// Edits to a student coming from the admin form.
#[derive(Debug, Clone, Default)]
pub struct EditStudent {
    pub name: String,
    pub category: String,
    pub new_cover: Option<MediaBlob>,
}

#[derive(Default)]
struct ViewState {
    students: Vec<Student>,
    artworks: Vec<Artwork>,
    students_ready: bool,
    artworks_ready: bool,
}

/// The reconciliation service: owns the in-memory merged view and the
/// per-collection readiness flags, and routes every write through the
/// local-first decision. One instance replaces the free-floating module
/// state the presentation layer would otherwise share across callbacks.
///
/// The view mutex is never held across an await: each mutation reads the
/// full current cache from the store, computes the next whole collection,
/// then swaps it in (last-writer-wins at collection granularity).
pub struct GalleryService {
    store: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    uploader: Arc<dyn MediaUploader>,
    drainer: Option<SyncDrainer>,
    state: Mutex<ViewState>,
    events: broadcast::Sender<ViewEvent>,
}

impl GalleryService {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        uploader: Arc<dyn MediaUploader>,
    ) -> Self {
        let drainer = remote
            .as_ref()
            .map(|remote| SyncDrainer::new(store.clone(), remote.clone(), uploader.clone()));
        let (events, _) = broadcast::channel(32);
        Self {
            store,
            remote,
            uploader,
            drainer,
            state: Mutex::new(ViewState::default()),
            events,
        }
    }

    /// Current presented students (already merged, filtered and sorted).
    pub fn students(&self) -> Vec<Student> {
        self.state.lock().unwrap().students.clone()
    }

    /// Current presented artworks.
    pub fn artworks(&self) -> Vec<Artwork> {
        self.state.lock().unwrap().artworks.clone()
    }

    /// Artworks belonging to one student, from the current presented view.
    /// An id with no matching student simply yields an empty list, which is
    /// also how orphaned artworks are kept off a student page.
    pub fn artworks_for_student(&self, student_id: &str) -> Vec<Artwork> {
        self.state
            .lock()
            .unwrap()
            .artworks
            .iter()
            .filter(|artwork| artwork.student_id == student_id)
            .cloned()
            .collect()
    }

    /// Whether a real snapshot or an explicit fallback has populated the
    /// collection. False means "don't render an empty state yet".
    pub fn is_ready(&self, collection: Collection) -> bool {
        let state = self.state.lock().unwrap();
        match collection {
            Collection::Students => state.students_ready,
            Collection::Artworks => state.artworks_ready,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    fn emit(&self, collection: Collection) {
        let _ = self.events.send(ViewEvent::Refreshed(collection));
    }

    /// Populate the view from the local cache at startup. Quietly does
    /// nothing when the cache is empty so the first render waits for a
    /// snapshot (or an explicit fallback) instead of flashing empty.
    pub async fn bootstrap(&self) -> bool {
        self.apply_local_fallback(false).await
    }

    /// Re-apply the tombstone-filtered local snapshot. With `force` false
    /// an empty cache is left alone and `false` is returned.
    pub async fn apply_local_fallback(&self, force: bool) -> bool {
        let (students, artworks) = self.load_filtered().await;
        if !force && students.is_empty() && artworks.is_empty() {
            return false;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.students = students;
            state.artworks = artworks;
            state.students_ready = true;
            state.artworks_ready = true;
        }
        self.emit(Collection::Students);
        self.emit(Collection::Artworks);
        true
    }

    /// The local store notified us of an external write (another window,
    /// a background task); refresh the presented view from it.
    pub async fn handle_storage_changed(&self) {
        self.apply_local_fallback(true).await;
    }

    /// A remote snapshot arrived: merge with the local cache, filter
    /// tombstones, sort, persist the result and refresh the view.
    pub async fn apply_snapshot(&self, collection: Collection, docs: Vec<RemoteDoc>) {
        match collection {
            Collection::Students => self.apply_students_snapshot(docs).await,
            Collection::Artworks => self.apply_artworks_snapshot(docs).await,
        }
    }

    /// The remote subscription itself failed; degrade to the local-only
    /// view instead of rendering nothing.
    pub async fn handle_snapshot_error(&self, collection: Collection, err: SyncError) {
        warn!(
            "remote snapshot for {} unavailable, falling back to local view: {}",
            collection.as_str(),
            err
        );
        self.apply_local_fallback(true).await;
    }

    /// Drive a remote subscription, dispatching every snapshot or failure
    /// into the reconciliation pipeline. Runs until the stream ends.
    pub async fn watch(&self, collection: Collection) -> ServiceResult<()> {
        let remote = self
            .remote
            .as_ref()
            .ok_or(ServiceError::Sync(SyncError::Offline))?;
        let mut snapshots = remote.subscribe(collection).await?;
        while let Some(snapshot) = snapshots.next().await {
            match snapshot {
                Ok(docs) => self.apply_snapshot(collection, docs).await,
                Err(err) => self.handle_snapshot_error(collection, err).await,
            }
        }
        Ok(())
    }

    /// Connectivity is back (or the app just started): push the pending
    /// queue, then refresh the view from the store. Never fails; the
    /// summary carries the per-collection counts for UI reporting.
    pub async fn connectivity_restored(&self) -> DrainSummary {
        let summary = match &self.drainer {
            Some(drainer) => drainer.drain().await,
            None => DrainSummary::default(),
        };
        if summary.ran {
            self.apply_local_fallback(true).await;
        }
        summary
    }

    /// Create a student: cloud-first when a remote store is configured,
    /// otherwise (or on any failure) saved locally with an embedded cover
    /// and queued for the next drain.
    pub async fn add_student(
        &self,
        new: NewStudent,
        progress: Option<ProgressFn>,
    ) -> ServiceResult<SaveOutcome<Student>> {
        new.validate().map_err(ServiceError::Domain)?;
        let id = generate_record_id(crate::domains::student::STUDENT_ID_PREFIX);
        let created_at = now_millis();

        if let Some(remote) = &self.remote {
            match self
                .publish_student(remote.as_ref(), &id, &new, created_at, progress)
                .await
            {
                Ok(cover_url) => {
                    let student = Student {
                        id,
                        name: new.name,
                        category: new.category,
                        cover_url,
                        created_at,
                        local_only: false,
                    };
                    self.persist_new_student(student.clone()).await;
                    return Ok(SaveOutcome::Cloud(student));
                }
                Err(err) => {
                    warn!("remote add failed, keeping student locally: {}", err);
                }
            }
        }

        let doc = StudentDoc {
            id: Some(id),
            name: new.name,
            category: new.category,
            cover_url: new.cover.to_data_url(),
            created_at: json!(created_at),
            local_only: json!(true),
        };
        let student = match self.store.add_student(doc.clone()).await {
            Ok(student) => student,
            Err(err) => {
                // Persistence failed; keep the session view consistent anyway.
                warn!("local add failed, record lives in memory only: {}", err);
                Student::from(doc)
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            state.students.insert(0, student.clone());
            state.students_ready = true;
        }
        self.emit(Collection::Students);
        Ok(SaveOutcome::Local(student))
    }

    /// Submit a batch of artworks. Each entry independently lands in the
    /// cloud or falls back to the local queue; the summary reports how many
    /// went where.
    pub async fn add_artworks(
        &self,
        entries: Vec<NewArtwork>,
        progress: Option<ProgressFn>,
    ) -> ServiceResult<BatchSaveSummary> {
        for entry in &entries {
            entry.validate().map_err(ServiceError::Domain)?;
        }

        let total = entries.len() as u32;
        let mut summary = BatchSaveSummary::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match self.add_artwork(entry).await {
                SaveOutcome::Cloud(_) => summary.cloud += 1,
                SaveOutcome::Local(_) => summary.local += 1,
            }
            if let Some(progress) = &progress {
                progress((((index as u32 + 1) * 100) / total.max(1)) as u8);
            }
        }
        self.emit(Collection::Artworks);
        Ok(summary)
    }

    async fn add_artwork(&self, entry: NewArtwork) -> SaveOutcome<Artwork> {
        let id = generate_record_id(crate::domains::artwork::ARTWORK_ID_PREFIX);
        let created_at = now_millis();
        let title = if entry.title.trim().is_empty() {
            DEFAULT_ARTWORK_TITLE.to_string()
        } else {
            entry.title.clone()
        };

        if let Some(remote) = &self.remote {
            match self
                .publish_artwork(remote.as_ref(), &id, &entry, &title, created_at)
                .await
            {
                Ok(artwork) => {
                    self.persist_new_artwork(artwork.clone()).await;
                    return SaveOutcome::Cloud(artwork);
                }
                Err(err) => {
                    warn!("remote add failed, keeping artwork locally: {}", err);
                }
            }
        }

        let placeholder = entry.media.to_data_url();
        let (image_url, video_url) = match entry.media_type {
            MediaType::Image => (Some(placeholder), None),
            MediaType::Video => (None, Some(placeholder)),
        };
        let doc = ArtworkDoc {
            id: Some(id),
            student_id: entry.student_id,
            kind: entry.kind,
            title,
            description: entry.description,
            media_type: Some(entry.media_type.as_str().to_string()),
            image_url,
            video_url,
            created_at: json!(created_at),
            local_only: json!(true),
        };
        let artwork = match self.store.add_artwork(doc.clone()).await {
            Ok(artwork) => artwork,
            Err(err) => {
                warn!("local add failed, record lives in memory only: {}", err);
                Artwork::from(doc)
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            state.artworks.insert(0, artwork.clone());
            state.artworks_ready = true;
        }
        SaveOutcome::Local(artwork)
    }

    /// Edit a student. A still-queued record is edited purely locally; a
    /// remote-backed record gets a remote point write first and falls back
    /// to a local save. The failed edit is not re-queued: the remote copy
    /// stays authoritative and the next snapshot supersedes the local edit.
    pub async fn update_student(
        &self,
        id: &str,
        edits: EditStudent,
        progress: Option<ProgressFn>,
    ) -> ServiceResult<SaveOutcome<Student>> {
        let current = self
            .store
            .load_students()
            .await
            .map_err(ServiceError::Domain)?
            .into_iter()
            .find(|student| student.id == id)
            .ok_or_else(|| {
                ServiceError::Domain(DomainError::EntityNotFound(
                    "student".to_string(),
                    id.to_string(),
                ))
            })?;

        if current.local_only {
            let updates = UpdateStudent {
                name: Some(edits.name),
                category: Some(edits.category),
                cover_url: edits.new_cover.as_ref().map(MediaBlob::to_data_url),
                ..Default::default()
            };
            let updated = self.apply_student_update(&current, &updates).await;
            return Ok(SaveOutcome::Local(updated));
        }

        if let Some(remote) = &self.remote {
            match self
                .publish_student_update(remote.as_ref(), &current, &edits, progress)
                .await
            {
                Ok(cover_url) => {
                    let updates = UpdateStudent {
                        name: Some(edits.name),
                        category: Some(edits.category),
                        cover_url,
                        ..Default::default()
                    };
                    let updated = self.apply_student_update(&current, &updates).await;
                    return Ok(SaveOutcome::Cloud(updated));
                }
                Err(err) => {
                    warn!("remote update failed, saving edits locally: {}", err);
                }
            }
        }

        let updates = UpdateStudent {
            name: Some(edits.name),
            category: Some(edits.category),
            cover_url: edits.new_cover.as_ref().map(MediaBlob::to_data_url),
            ..Default::default()
        };
        let updated = self.apply_student_update(&current, &updates).await;
        Ok(SaveOutcome::Local(updated))
    }

    /// Delete a student and all of their artworks. Local-first: tombstone,
    /// local removal and re-render happen before the remote delete is even
    /// attempted; a failed remote delete leaves the tombstone in place so
    /// the record stays hidden until delete is re-invoked.
    pub async fn delete_student(&self, id: &str) -> ServiceResult<DeleteOutcome> {
        if let Err(err) = self.store.mark_deleted(Collection::Students, id).await {
            warn!("failed to persist tombstone for student {}: {}", id, err);
        }

        let (students, artworks) = match self.store.remove_student(id).await {
            Ok(data) => (data.students, data.artworks),
            Err(err) => {
                warn!("local removal failed, updating in-memory view only: {}", err);
                let state = self.state.lock().unwrap();
                (
                    state
                        .students
                        .iter()
                        .filter(|student| student.id != id)
                        .cloned()
                        .collect(),
                    state
                        .artworks
                        .iter()
                        .filter(|artwork| artwork.student_id != id)
                        .cloned()
                        .collect(),
                )
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            state.students = students;
            state.artworks = artworks;
        }
        self.emit(Collection::Students);
        self.emit(Collection::Artworks);

        let Some(remote) = &self.remote else {
            return Ok(DeleteOutcome::LocalHidden);
        };
        match self.cascade_remote_delete(remote.as_ref(), id).await {
            Ok(()) => {
                if let Err(err) = self.store.clear_deleted(Collection::Students, id).await {
                    warn!("failed to clear confirmed tombstone for {}: {}", id, err);
                }
                Ok(DeleteOutcome::CloudConfirmed)
            }
            Err(err) => {
                warn!(
                    "remote delete failed, student {} stays hidden by tombstone: {}",
                    id, err
                );
                Ok(DeleteOutcome::LocalHidden)
            }
        }
    }

    /// Delete a single artwork, same protocol without the cascade.
    pub async fn delete_artwork(&self, id: &str) -> ServiceResult<DeleteOutcome> {
        if let Err(err) = self.store.mark_deleted(Collection::Artworks, id).await {
            warn!("failed to persist tombstone for artwork {}: {}", id, err);
        }

        let artworks = match self.store.remove_artwork(id).await {
            Ok(artworks) => artworks,
            Err(err) => {
                warn!("local removal failed, updating in-memory view only: {}", err);
                let state = self.state.lock().unwrap();
                state
                    .artworks
                    .iter()
                    .filter(|artwork| artwork.id != id)
                    .cloned()
                    .collect()
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            state.artworks = artworks;
        }
        self.emit(Collection::Artworks);

        let Some(remote) = &self.remote else {
            return Ok(DeleteOutcome::LocalHidden);
        };
        match remote.delete(Collection::Artworks, id).await {
            Ok(()) => {
                if let Err(err) = self.store.clear_deleted(Collection::Artworks, id).await {
                    warn!("failed to clear confirmed tombstone for {}: {}", id, err);
                }
                Ok(DeleteOutcome::CloudConfirmed)
            }
            Err(err) => {
                warn!(
                    "remote delete failed, artwork {} stays hidden by tombstone: {}",
                    id, err
                );
                Ok(DeleteOutcome::LocalHidden)
            }
        }
    }

    async fn load_filtered(&self) -> (Vec<Student>, Vec<Artwork>) {
        let data = match self.store.load().await {
            Ok(data) => data,
            Err(err) => {
                warn!("local cache unreadable, treating as empty: {}", err);
                LocalData::default()
            }
        };
        let deleted = match self.store.load_tombstones().await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!("tombstones unreadable, treating as empty: {}", err);
                DeletedIds::default()
            }
        };
        (
            filter_deleted(data.students, &deleted.students),
            filter_deleted(data.artworks, &deleted.artworks),
        )
    }

    async fn apply_students_snapshot(&self, docs: Vec<RemoteDoc>) {
        let remote: Vec<Student> = docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                match doc.into_record::<Student>() {
                    Ok(student) => Some(student),
                    Err(err) => {
                        warn!("skipping malformed student document {}: {}", id, err);
                        None
                    }
                }
            })
            .collect();
        debug!("students snapshot: {} documents", remote.len());

        let stored = self.store.load_students().await.unwrap_or_else(|err| {
            warn!("local students unreadable during merge: {}", err);
            Vec::new()
        });
        let deleted = self.store.load_tombstones().await.unwrap_or_else(|err| {
            warn!("tombstones unreadable during merge: {}", err);
            DeletedIds::default()
        });

        let mut merged = filter_deleted(merge_by_id(&remote, &stored), &deleted.students);
        sort_newest_first(&mut merged);
        if let Err(err) = self.store.save_students(&merged).await {
            warn!("failed to persist merged students: {}", err);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.students = merged;
            state.students_ready = true;
        }
        self.emit(Collection::Students);
    }

    async fn apply_artworks_snapshot(&self, docs: Vec<RemoteDoc>) {
        let remote: Vec<Artwork> = docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                match doc.into_record::<Artwork>() {
                    Ok(artwork) => Some(artwork),
                    Err(err) => {
                        warn!("skipping malformed artwork document {}: {}", id, err);
                        None
                    }
                }
            })
            .collect();
        debug!("artworks snapshot: {} documents", remote.len());

        let stored = self.store.load_artworks().await.unwrap_or_else(|err| {
            warn!("local artworks unreadable during merge: {}", err);
            Vec::new()
        });
        let deleted = self.store.load_tombstones().await.unwrap_or_else(|err| {
            warn!("tombstones unreadable during merge: {}", err);
            DeletedIds::default()
        });

        let mut merged = filter_deleted(merge_by_id(&remote, &stored), &deleted.artworks);
        sort_newest_first(&mut merged);
        if let Err(err) = self.store.save_artworks(&merged).await {
            warn!("failed to persist merged artworks: {}", err);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.artworks = merged;
            state.artworks_ready = true;
        }
        self.emit(Collection::Artworks);
    }

    async fn publish_student(
        &self,
        remote: &dyn RemoteStore,
        id: &str,
        new: &NewStudent,
        created_at: i64,
        progress: Option<ProgressFn>,
    ) -> SyncResult<String> {
        let cover_url = self
            .uploader
            .upload(&new.cover, MediaType::Image, progress)
            .await?;
        let fields = json!({
            "name": new.name,
            "category": new.category,
            "coverUrl": cover_url,
            "createdAt": created_at,
        });
        remote.put(Collection::Students, id, fields).await?;
        Ok(cover_url)
    }

    async fn publish_artwork(
        &self,
        remote: &dyn RemoteStore,
        id: &str,
        entry: &NewArtwork,
        title: &str,
        created_at: i64,
    ) -> SyncResult<Artwork> {
        let durable_url = self
            .uploader
            .upload(&entry.media, entry.media_type, None)
            .await?;
        let media = match entry.media_type {
            MediaType::Image => ArtworkMedia::image(durable_url),
            MediaType::Video => ArtworkMedia::video(durable_url),
        };

        let mut fields = json!({
            "studentId": entry.student_id,
            "type": entry.kind,
            "title": title,
            "description": entry.description,
            "mediaType": media.media_type().as_str(),
            "createdAt": created_at,
        });
        match media.media_type() {
            MediaType::Image => fields["imageUrl"] = json!(media.url()),
            MediaType::Video => fields["videoUrl"] = json!(media.url()),
        }
        remote.put(Collection::Artworks, id, fields).await?;

        Ok(Artwork {
            id: id.to_string(),
            student_id: entry.student_id.clone(),
            kind: entry.kind.clone(),
            title: title.to_string(),
            description: entry.description.clone(),
            media,
            created_at,
            local_only: false,
        })
    }

    async fn publish_student_update(
        &self,
        remote: &dyn RemoteStore,
        current: &Student,
        edits: &EditStudent,
        progress: Option<ProgressFn>,
    ) -> SyncResult<Option<String>> {
        let cover_url = match &edits.new_cover {
            Some(cover) => Some(
                self.uploader
                    .upload(cover, MediaType::Image, progress)
                    .await?,
            ),
            None => None,
        };
        let fields = json!({
            "name": edits.name,
            "category": edits.category,
            "coverUrl": cover_url.clone().unwrap_or_else(|| current.cover_url.clone()),
            "createdAt": current.created_at,
        });
        remote.put(Collection::Students, &current.id, fields).await?;
        Ok(cover_url)
    }

    async fn apply_student_update(&self, current: &Student, updates: &UpdateStudent) -> Student {
        let updated = updates.apply(current);
        if let Err(err) = self.store.update_student(&current.id, updates).await {
            warn!("failed to persist update of student {}: {}", current.id, err);
        }
        {
            let mut state = self.state.lock().unwrap();
            for student in state.students.iter_mut() {
                if student.id == current.id {
                    *student = updated.clone();
                }
            }
        }
        self.emit(Collection::Students);
        updated
    }

    async fn persist_new_student(&self, student: Student) {
        if let Err(err) = self.store.add_student(student.clone().into()).await {
            warn!("failed to persist student {}: {}", student.id, err);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.students.insert(0, student);
            state.students_ready = true;
        }
        self.emit(Collection::Students);
    }

    async fn persist_new_artwork(&self, artwork: Artwork) {
        if let Err(err) = self.store.add_artwork(artwork.clone().into()).await {
            warn!("failed to persist artwork {}: {}", artwork.id, err);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.artworks.insert(0, artwork);
            state.artworks_ready = true;
        }
    }

    /// Best-effort cascade: the student's artworks first, then the student.
    /// Any failure aborts and leaves the tombstone standing.
    async fn cascade_remote_delete(&self, remote: &dyn RemoteStore, id: &str) -> SyncResult<()> {
        let children = remote
            .query_by_field(Collection::Artworks, "studentId", id)
            .await?;
        for child in children {
            remote.delete(Collection::Artworks, &child.id).await?;
        }
        remote.delete(Collection::Students, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::store::SqliteLocalStore;
    use crate::domains::sync::remote::MockRemoteStore;
    use crate::domains::sync::uploader::MockMediaUploader;
    use sqlx::SqlitePool;

    struct Harness {
        service: GalleryService,
        store: Arc<SqliteLocalStore>,
        remote: Arc<MockRemoteStore>,
        uploader: Arc<MockMediaUploader>,
    }

    async fn harness() -> Harness {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = Arc::new(SqliteLocalStore::initialize(pool).await.unwrap());
        let remote = Arc::new(MockRemoteStore::new());
        let uploader = Arc::new(MockMediaUploader::new());
        let service = GalleryService::new(
            store.clone(),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            uploader.clone(),
        );
        Harness {
            service,
            store,
            remote,
            uploader,
        }
    }

    fn student_doc(id: &str, created_at: i64) -> RemoteDoc {
        RemoteDoc::new(
            id,
            json!({
                "name": format!("name-{}", id),
                "category": "Art",
                "coverUrl": "https://cdn.example.com/c.png",
                "createdAt": created_at,
            }),
        )
    }

    fn new_student(name: &str) -> NewStudent {
        NewStudent {
            name: name.to_string(),
            category: "Art".to_string(),
            cover: MediaBlob::from_bytes("image/png", b"raw".to_vec()),
        }
    }

    #[tokio::test]
    async fn bootstrap_with_empty_cache_keeps_view_not_ready() {
        let h = harness().await;
        assert!(!h.service.bootstrap().await);
        assert!(!h.service.is_ready(Collection::Students));
        assert!(!h.service.is_ready(Collection::Artworks));
    }

    #[tokio::test]
    async fn snapshot_merges_remote_over_local_and_sorts() {
        let h = harness().await;
        h.store
            .add_student(crate::domains::student::StudentDoc {
                id: Some("queued".to_string()),
                name: "Queued".to_string(),
                created_at: json!(5),
                local_only: json!(true),
                ..Default::default()
            })
            .await
            .unwrap();

        h.service
            .apply_snapshot(
                Collection::Students,
                vec![student_doc("s1", 10), student_doc("s2", 30)],
            )
            .await;

        let students = h.service.students();
        let ids: Vec<&str> = students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1", "queued"]);
        assert!(h.service.is_ready(Collection::Students));
        // Merged view is persisted back to the cache.
        assert_eq!(h.store.load_students().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tombstone_hides_record_in_stale_snapshot() {
        let h = harness().await;
        h.store
            .mark_deleted(Collection::Students, "s1")
            .await
            .unwrap();

        h.service
            .apply_snapshot(Collection::Students, vec![student_doc("s1", 10)])
            .await;

        assert!(h.service.students().is_empty());
        assert!(h.service.is_ready(Collection::Students));
    }

    #[tokio::test]
    async fn snapshot_error_falls_back_to_local_view() {
        let h = harness().await;
        h.store
            .add_student(crate::domains::student::StudentDoc {
                id: Some("s1".to_string()),
                name: "Lina".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        h.service
            .handle_snapshot_error(
                Collection::Students,
                SyncError::Network("denied".to_string()),
            )
            .await;

        assert_eq!(h.service.students().len(), 1);
        assert!(h.service.is_ready(Collection::Students));
        assert!(h.service.is_ready(Collection::Artworks));
    }

    #[tokio::test]
    async fn add_student_reaches_cloud_when_remote_is_up() {
        let h = harness().await;
        let outcome = h
            .service
            .add_student(new_student("Lina"), None)
            .await
            .unwrap();
        assert!(!outcome.is_local());
        let student = outcome.record();
        assert!(!student.local_only);
        assert!(student.cover_url.starts_with("https://media.test/"));
        assert!(h.remote.doc(Collection::Students, &student.id).is_some());
        assert_eq!(h.store.load_students().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_student_falls_back_to_local_queue() {
        let h = harness().await;
        h.remote.set_fail_writes(true);
        let outcome = h
            .service
            .add_student(new_student("Lina"), None)
            .await
            .unwrap();
        assert!(outcome.is_local());
        let student = outcome.record();
        assert!(student.local_only);
        assert!(crate::types::is_embedded_media(&student.cover_url));
        assert!(h.remote.doc(Collection::Students, &student.id).is_none());
        let stored = h.store.load_students().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].local_only);
    }

    #[tokio::test]
    async fn add_artworks_reports_batch_split() {
        let h = harness().await;
        let entries = vec![
            NewArtwork {
                student_id: "s1".to_string(),
                kind: "painting".to_string(),
                title: String::new(),
                description: String::new(),
                media_type: MediaType::Image,
                media: MediaBlob::from_bytes("image/png", b"a".to_vec()),
            },
            NewArtwork {
                student_id: "s1".to_string(),
                kind: "film".to_string(),
                title: "Clip".to_string(),
                description: String::new(),
                media_type: MediaType::Video,
                media: MediaBlob::from_bytes("video/mp4", b"b".to_vec()),
            },
        ];
        let summary = h.service.add_artworks(entries, None).await.unwrap();
        assert_eq!(summary, BatchSaveSummary { cloud: 2, local: 0 });
        let artworks = h.service.artworks();
        assert_eq!(artworks.len(), 2);
        assert!(artworks.iter().any(|a| a.title == DEFAULT_ARTWORK_TITLE));
    }

    #[tokio::test]
    async fn delete_student_cascades_and_clears_tombstone() {
        let h = harness().await;
        // Seed the remote store with the student and one artwork.
        h.remote
            .put(
                Collection::Students,
                "s1",
                json!({"name": "Lina", "createdAt": 10}),
            )
            .await
            .unwrap();
        h.remote
            .put(
                Collection::Artworks,
                "a1",
                json!({"studentId": "s1", "createdAt": 20}),
            )
            .await
            .unwrap();
        h.service
            .apply_snapshot(Collection::Students, vec![student_doc("s1", 10)])
            .await;

        let outcome = h.service.delete_student("s1").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::CloudConfirmed);
        assert!(h.service.students().is_empty());
        assert!(h.store.load_tombstones().await.unwrap().students.is_empty());
        let deletes = h.remote.deletes();
        assert!(deletes.contains(&(Collection::Artworks, "a1".to_string())));
        assert!(deletes.contains(&(Collection::Students, "s1".to_string())));

        // A fresh snapshot without the record keeps the view clean.
        h.service.apply_snapshot(Collection::Students, vec![]).await;
        assert!(h.service.students().is_empty());
    }

    #[tokio::test]
    async fn failed_remote_delete_keeps_record_hidden() {
        let h = harness().await;
        h.service
            .apply_snapshot(Collection::Students, vec![student_doc("s1", 10)])
            .await;
        h.remote.set_fail_deletes(true);

        let outcome = h.service.delete_student("s1").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::LocalHidden);
        assert!(h.service.students().is_empty());
        assert!(h
            .store
            .load_tombstones()
            .await
            .unwrap()
            .students
            .contains("s1"));

        // The stale remote snapshot cannot resurrect it.
        h.service
            .apply_snapshot(Collection::Students, vec![student_doc("s1", 10)])
            .await;
        assert!(h.service.students().is_empty());
    }

    #[tokio::test]
    async fn editing_remote_backed_record_survives_remote_failure() {
        let h = harness().await;
        h.service
            .apply_snapshot(Collection::Students, vec![student_doc("s1", 10)])
            .await;
        h.remote.set_fail_writes(true);

        let outcome = h
            .service
            .update_student(
                "s1",
                EditStudent {
                    name: "Renamed".to_string(),
                    category: "Art".to_string(),
                    new_cover: None,
                },
                None,
            )
            .await
            .unwrap();
        assert!(outcome.is_local());
        let stored = h.store.load_students().await.unwrap();
        assert_eq!(stored[0].name, "Renamed");
        // Not re-queued: the remote copy stays authoritative.
        assert!(!stored[0].local_only);
        assert_eq!(stored[0].created_at, 10);
    }

    #[tokio::test]
    async fn connectivity_restored_drains_the_queue() {
        let h = harness().await;
        h.remote.set_fail_writes(true);
        h.service
            .add_student(new_student("Lina"), None)
            .await
            .unwrap();

        h.remote.set_fail_writes(false);
        let summary = h.service.connectivity_restored().await;
        assert!(summary.ran);
        assert_eq!(summary.students.synced, 1);
        assert_eq!(summary.students.failed, 0);
        let students = h.service.students();
        assert_eq!(students.len(), 1);
        assert!(!students[0].local_only);
        // One upload for the failed direct add, one during the drain.
        assert_eq!(h.uploader.upload_count(), 2);
    }

    #[tokio::test]
    async fn storage_change_notification_reapplies_local_view() {
        let h = harness().await;
        h.store
            .add_student(crate::domains::student::StudentDoc {
                id: Some("s1".to_string()),
                name: "Lina".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        h.store
            .mark_deleted(Collection::Students, "s1")
            .await
            .unwrap();

        h.service.handle_storage_changed().await;
        assert!(h.service.students().is_empty());
        assert!(h.service.is_ready(Collection::Students));
    }
}
