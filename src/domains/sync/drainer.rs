use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::json;
use tokio::sync::Mutex;

use crate::domains::artwork::{Artwork, UpdateArtwork};
use crate::domains::store::LocalStore;
use crate::domains::student::{Student, UpdateStudent};
use crate::domains::sync::remote::RemoteStore;
use crate::domains::sync::uploader::{MediaBlob, MediaUploader, MediaType};
use crate::types::{is_embedded_media, Collection};

/// Per-collection drain result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainCounts {
    pub synced: u32,
    pub failed: u32,
}

/// Aggregate result of one drain call. `ran` is false when the call was a
/// no-op because another drain was already in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub students: DrainCounts,
    pub artworks: DrainCounts,
    pub ran: bool,
}

impl DrainSummary {
    fn not_run() -> Self {
        Self::default()
    }

    pub fn total_synced(&self) -> u32 {
        self.students.synced + self.artworks.synced
    }

    pub fn total_failed(&self) -> u32 {
        self.students.failed + self.artworks.failed
    }
}

/// Pushes every `localOnly` record to the remote store.
///
/// Records are processed sequentially within a collection, students before
/// artworks. The pending sets and the blocked-parent set are computed once
/// at drain start, so an artwork whose student was still pending at scan
/// time waits for the next cycle even if that student synced in this one.
/// Never returns an error: per-record failures only show up in the counts,
/// and the failed record's local state is left untouched for the next call.
pub struct SyncDrainer {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    uploader: Arc<dyn MediaUploader>,
    running: Mutex<()>,
}

impl SyncDrainer {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        uploader: Arc<dyn MediaUploader>,
    ) -> Self {
        Self {
            store,
            remote,
            uploader,
            running: Mutex::new(()),
        }
    }

    /// Attempt to push every pending record. A call while another drain is
    /// running returns immediately without attempting any work, so a record
    /// is never written to the remote store twice concurrently.
    pub async fn drain(&self) -> DrainSummary {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("drain already in progress, skipping");
                return DrainSummary::not_run();
            }
        };

        let data = match self.store.load().await {
            Ok(data) => data,
            Err(err) => {
                error!("drain aborted, local cache unreadable: {}", err);
                return DrainSummary {
                    ran: true,
                    ..DrainSummary::default()
                };
            }
        };

        let pending_students: Vec<Student> = data
            .students
            .iter()
            .filter(|student| student.local_only)
            .cloned()
            .collect();
        let blocked_parents: HashSet<String> = pending_students
            .iter()
            .map(|student| student.id.clone())
            .collect();
        let pending_artworks: Vec<Artwork> = data
            .artworks
            .iter()
            .filter(|artwork| artwork.local_only)
            .cloned()
            .collect();

        let students = self.drain_students(&pending_students).await;
        let artworks = self.drain_artworks(&pending_artworks, &blocked_parents).await;

        DrainSummary {
            students,
            artworks,
            ran: true,
        }
    }

    async fn drain_students(&self, pending: &[Student]) -> DrainCounts {
        let mut counts = DrainCounts::default();
        for student in pending {
            match self.push_student(student).await {
                Ok(()) => counts.synced += 1,
                Err(err) => {
                    warn!("student {} left queued: {}", student.id, err);
                    counts.failed += 1;
                }
            }
        }
        counts
    }

    async fn push_student(&self, student: &Student) -> crate::errors::SyncResult<()> {
        let mut cover_url = student.cover_url.clone();
        if is_embedded_media(&cover_url) {
            cover_url = self
                .uploader
                .upload(&MediaBlob::DataUrl(cover_url), MediaType::Image, None)
                .await?;
        }

        let fields = json!({
            "name": student.name,
            "category": student.category,
            "coverUrl": cover_url,
            "createdAt": student.created_at,
        });
        self.remote
            .put(Collection::Students, &student.id, fields)
            .await?;

        let updates = UpdateStudent {
            cover_url: Some(cover_url),
            local_only: Some(false),
            ..Default::default()
        };
        if let Err(err) = self.store.update_student(&student.id, &updates).await {
            // The remote write went through; the promotion retries next cycle.
            error!("failed to persist promotion of student {}: {}", student.id, err);
        }
        Ok(())
    }

    async fn drain_artworks(
        &self,
        pending: &[Artwork],
        blocked_parents: &HashSet<String>,
    ) -> DrainCounts {
        let mut counts = DrainCounts::default();
        for artwork in pending {
            if artwork.student_id.is_empty() || blocked_parents.contains(&artwork.student_id) {
                debug!(
                    "artwork {} waits for student {} to sync first",
                    artwork.id, artwork.student_id
                );
                counts.failed += 1;
                continue;
            }
            if artwork.media.url().is_empty() {
                warn!("artwork {} has no media url, leaving queued", artwork.id);
                counts.failed += 1;
                continue;
            }
            match self.push_artwork(artwork).await {
                Ok(()) => counts.synced += 1,
                Err(err) => {
                    warn!("artwork {} left queued: {}", artwork.id, err);
                    counts.failed += 1;
                }
            }
        }
        counts
    }

    async fn push_artwork(&self, artwork: &Artwork) -> crate::errors::SyncResult<()> {
        let mut media = artwork.media.clone();
        if is_embedded_media(media.url()) {
            let durable_url = self
                .uploader
                .upload(
                    &MediaBlob::DataUrl(media.url().to_string()),
                    media.media_type(),
                    None,
                )
                .await?;
            media = media.with_url(durable_url);
        }

        let mut fields = json!({
            "studentId": artwork.student_id,
            "type": artwork.kind,
            "title": artwork.title,
            "description": artwork.description,
            "mediaType": media.media_type().as_str(),
            "createdAt": artwork.created_at,
        });
        match media.media_type() {
            MediaType::Image => fields["imageUrl"] = json!(media.url()),
            MediaType::Video => fields["videoUrl"] = json!(media.url()),
        }
        self.remote
            .put(Collection::Artworks, &artwork.id, fields)
            .await?;

        let updates = UpdateArtwork {
            media: Some(media),
            local_only: Some(false),
            ..Default::default()
        };
        if let Err(err) = self.store.update_artwork(&artwork.id, &updates).await {
            error!("failed to persist promotion of artwork {}: {}", artwork.id, err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::artwork::ArtworkDoc;
    use crate::domains::store::SqliteLocalStore;
    use crate::domains::student::StudentDoc;
    use crate::domains::sync::remote::MockRemoteStore;
    use crate::domains::sync::uploader::MockMediaUploader;
    use crate::types::embed_media;
    use serde_json::json;
    use sqlx::SqlitePool;
    use std::time::Duration;

    async fn test_store() -> Arc<SqliteLocalStore> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        Arc::new(SqliteLocalStore::initialize(pool).await.unwrap())
    }

    fn drainer(
        store: Arc<SqliteLocalStore>,
        remote: Arc<MockRemoteStore>,
        uploader: Arc<MockMediaUploader>,
    ) -> SyncDrainer {
        SyncDrainer::new(store, remote, uploader)
    }

    async fn seed_local_student(store: &SqliteLocalStore, id: &str, cover_url: &str) {
        store
            .add_student(StudentDoc {
                id: Some(id.to_string()),
                name: "Lina".to_string(),
                category: "Art".to_string(),
                cover_url: cover_url.to_string(),
                created_at: json!(10),
                local_only: json!(true),
            })
            .await
            .unwrap();
    }

    async fn seed_local_artwork(store: &SqliteLocalStore, id: &str, student_id: &str) {
        store
            .add_artwork(ArtworkDoc {
                id: Some(id.to_string()),
                student_id: student_id.to_string(),
                kind: "painting".to_string(),
                title: "Dusk".to_string(),
                image_url: Some("https://cdn.example.com/a.png".to_string()),
                created_at: json!(20),
                local_only: json!(true),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_write_leaves_record_queued() {
        let store = test_store().await;
        seed_local_student(&store, "s1", "https://cdn.example.com/c.png").await;
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_fail_writes(true);
        let drainer = drainer(store.clone(), remote, Arc::new(MockMediaUploader::new()));

        let summary = drainer.drain().await;
        assert!(summary.ran);
        assert_eq!(summary.students, DrainCounts { synced: 0, failed: 1 });
        let students = store.load_students().await.unwrap();
        assert!(students[0].local_only);
    }

    #[tokio::test]
    async fn successful_drain_promotes_and_uploads() {
        let store = test_store().await;
        let placeholder = embed_media("image/png", b"raw");
        seed_local_student(&store, "s1", &placeholder).await;
        let remote = Arc::new(MockRemoteStore::new());
        let uploader = Arc::new(MockMediaUploader::new());
        let drainer = drainer(store.clone(), remote.clone(), uploader.clone());

        let summary = drainer.drain().await;
        assert_eq!(summary.students, DrainCounts { synced: 1, failed: 0 });
        assert_eq!(uploader.upload_count(), 1);

        let students = store.load_students().await.unwrap();
        assert!(!students[0].local_only);
        assert!(students[0].cover_url.starts_with("https://media.test/"));
        let doc = remote.doc(Collection::Students, "s1").unwrap();
        assert_eq!(doc["coverUrl"], students[0].cover_url);
        assert_eq!(doc["createdAt"], 10);
    }

    #[tokio::test]
    async fn upload_failure_aborts_record_without_remote_write() {
        let store = test_store().await;
        seed_local_student(&store, "s1", &embed_media("image/png", b"raw")).await;
        let remote = Arc::new(MockRemoteStore::new());
        let drainer = drainer(
            store.clone(),
            remote.clone(),
            Arc::new(MockMediaUploader::failing()),
        );

        let summary = drainer.drain().await;
        assert_eq!(summary.students, DrainCounts { synced: 0, failed: 1 });
        assert!(remote.writes().is_empty());
        let students = store.load_students().await.unwrap();
        assert!(students[0].local_only);
        assert!(is_embedded_media(&students[0].cover_url));
    }

    #[tokio::test]
    async fn artwork_waits_for_pending_parent() {
        let store = test_store().await;
        seed_local_student(&store, "s1", "https://cdn.example.com/c.png").await;
        seed_local_artwork(&store, "a1", "s1").await;
        let remote = Arc::new(MockRemoteStore::new());
        let drainer = drainer(store.clone(), remote.clone(), Arc::new(MockMediaUploader::new()));

        let first = drainer.drain().await;
        assert_eq!(first.students, DrainCounts { synced: 1, failed: 0 });
        assert_eq!(first.artworks, DrainCounts { synced: 0, failed: 1 });
        assert_eq!(remote.writes().len(), 1);

        let second = drainer.drain().await;
        assert_eq!(second.students, DrainCounts { synced: 0, failed: 0 });
        assert_eq!(second.artworks, DrainCounts { synced: 1, failed: 0 });
        let artworks = store.load_artworks().await.unwrap();
        assert!(!artworks[0].local_only);
        assert_eq!(
            remote.doc(Collection::Artworks, "a1").unwrap()["studentId"],
            "s1"
        );
    }

    #[tokio::test]
    async fn concurrent_drains_write_each_record_at_most_once() {
        let store = test_store().await;
        seed_local_student(&store, "s1", "https://cdn.example.com/c.png").await;
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_write_delay(Duration::from_millis(100));
        let drainer = Arc::new(drainer(
            store.clone(),
            remote.clone(),
            Arc::new(MockMediaUploader::new()),
        ));

        let first = {
            let drainer = drainer.clone();
            tokio::spawn(async move { drainer.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = drainer.drain().await;
        assert!(!second.ran);
        assert_eq!(second.total_synced() + second.total_failed(), 0);

        let first = first.await.unwrap();
        assert!(first.ran);
        assert_eq!(remote.writes().len(), 1);
    }

    #[tokio::test]
    async fn drain_without_pending_records_is_clean() {
        let store = test_store().await;
        let remote = Arc::new(MockRemoteStore::new());
        let drainer = drainer(store, remote.clone(), Arc::new(MockMediaUploader::new()));
        let summary = drainer.drain().await;
        assert!(summary.ran);
        assert_eq!(summary.total_synced(), 0);
        assert_eq!(summary.total_failed(), 0);
        assert!(remote.writes().is_empty());
    }
}
