use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::reconcile::Record;
use crate::domains::sync::uploader::{MediaBlob, MediaType};
use crate::errors::DomainResult;
use crate::types::{coerce_created_at, coerce_local_only, generate_record_id};
use crate::validation::{Validate, ValidationBuilder};

/// Id prefix for locally-generated artwork records.
pub const ARTWORK_ID_PREFIX: &str = "artwork";

/// An artwork's media reference. Exactly one url exists per record, matching
/// its kind; the legacy `mediaType` + `imageUrl`/`videoUrl` document shape is
/// produced and consumed by [`ArtworkDoc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtworkMedia {
    Image { url: String },
    Video { url: String },
}

impl ArtworkMedia {
    pub fn image(url: impl Into<String>) -> Self {
        ArtworkMedia::Image { url: url.into() }
    }

    pub fn video(url: impl Into<String>) -> Self {
        ArtworkMedia::Video { url: url.into() }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            ArtworkMedia::Image { .. } => MediaType::Image,
            ArtworkMedia::Video { .. } => MediaType::Video,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ArtworkMedia::Image { url } | ArtworkMedia::Video { url } => url,
        }
    }

    /// Same kind, new url. Used when a placeholder is replaced by the
    /// durable url an upload returned.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        match self {
            ArtworkMedia::Image { .. } => ArtworkMedia::image(url),
            ArtworkMedia::Video { .. } => ArtworkMedia::video(url),
        }
    }
}

/// Canonical artwork record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ArtworkDoc", into = "ArtworkDoc")]
pub struct Artwork {
    pub id: String,
    /// Foreign key to `Student::id` by convention only; an orphaned artwork
    /// is filtered by the presentation layer, never an error here.
    pub student_id: String,
    /// Free-form category, serialized as `type`.
    pub kind: String,
    pub title: String,
    pub description: String,
    pub media: ArtworkMedia,
    pub created_at: i64,
    pub local_only: bool,
}

impl Record for Artwork {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn created_at_millis(&self) -> i64 {
        self.created_at
    }
}

/// Loose artwork document. `mediaType` is authoritative when present;
/// otherwise a non-empty `videoUrl` means video, else image. That is the
/// defaulting the cached documents have always used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtworkDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub student_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub created_at: Value,
    pub local_only: Value,
}

impl From<ArtworkDoc> for Artwork {
    fn from(doc: ArtworkDoc) -> Self {
        let image_url = doc.image_url.unwrap_or_default();
        let video_url = doc.video_url.unwrap_or_default();
        let media = match doc.media_type.as_deref() {
            Some("video") => ArtworkMedia::video(video_url),
            Some(_) => ArtworkMedia::image(image_url),
            None if !video_url.is_empty() => ArtworkMedia::video(video_url),
            None => ArtworkMedia::image(image_url),
        };
        Artwork {
            id: doc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| generate_record_id(ARTWORK_ID_PREFIX)),
            student_id: doc.student_id,
            kind: doc.kind,
            title: doc.title,
            description: doc.description,
            media,
            created_at: coerce_created_at(Some(&doc.created_at)),
            local_only: coerce_local_only(&doc.local_only),
        }
    }
}

impl From<Artwork> for ArtworkDoc {
    fn from(artwork: Artwork) -> Self {
        let (image_url, video_url) = match &artwork.media {
            ArtworkMedia::Image { url } => (Some(url.clone()), None),
            ArtworkMedia::Video { url } => (None, Some(url.clone())),
        };
        ArtworkDoc {
            id: Some(artwork.id),
            student_id: artwork.student_id,
            kind: artwork.kind,
            title: artwork.title,
            description: artwork.description,
            media_type: Some(artwork.media.media_type().as_str().to_string()),
            image_url,
            video_url,
            created_at: Value::from(artwork.created_at),
            local_only: Value::from(artwork.local_only),
        }
    }
}

/// Input for creating an artwork.
#[derive(Debug, Clone)]
pub struct NewArtwork {
    pub student_id: String,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub media_type: MediaType,
    pub media: MediaBlob,
}

impl Validate for NewArtwork {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("studentId", Some(&self.student_id))
            .required()
            .validate()?;
        ValidationBuilder::new("type", Some(&self.kind))
            .required()
            .max_length(200)
            .validate()
    }
}

/// Partial update for an artwork; identity and creation instant are
/// preserved unconditionally, as for students.
#[derive(Debug, Clone, Default)]
pub struct UpdateArtwork {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub media: Option<ArtworkMedia>,
    pub local_only: Option<bool>,
}

impl UpdateArtwork {
    pub fn apply(&self, current: &Artwork) -> Artwork {
        Artwork {
            id: current.id.clone(),
            student_id: current.student_id.clone(),
            kind: self.kind.clone().unwrap_or_else(|| current.kind.clone()),
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
            media: self.media.clone().unwrap_or_else(|| current.media.clone()),
            created_at: current.created_at,
            local_only: self.local_only.unwrap_or(current.local_only),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn media_type_field_wins_over_urls() {
        let artwork: Artwork = serde_json::from_value(json!({
            "id": "artwork-1",
            "studentId": "student-1",
            "type": "painting",
            "mediaType": "image",
            "imageUrl": "https://cdn.example.com/a.png",
            "videoUrl": "https://cdn.example.com/ignored.mp4",
            "createdAt": 5
        }))
        .unwrap();
        assert_eq!(artwork.media, ArtworkMedia::image("https://cdn.example.com/a.png"));
    }

    #[test]
    fn missing_media_type_defaults_from_video_url() {
        let artwork: Artwork = serde_json::from_value(json!({
            "studentId": "student-1",
            "type": "film",
            "videoUrl": "https://cdn.example.com/clip.mp4",
            "createdAt": 5
        }))
        .unwrap();
        assert_eq!(artwork.media.media_type(), MediaType::Video);
        assert_eq!(artwork.media.url(), "https://cdn.example.com/clip.mp4");
    }

    #[test]
    fn exactly_one_url_survives_serialization() {
        let artwork = Artwork {
            id: "artwork-1".into(),
            student_id: "student-1".into(),
            kind: "painting".into(),
            title: "Dusk".into(),
            description: String::new(),
            media: ArtworkMedia::video("https://cdn.example.com/clip.mp4"),
            created_at: 5,
            local_only: false,
        };
        let value = serde_json::to_value(&artwork).unwrap();
        assert_eq!(value["mediaType"], "video");
        assert_eq!(value["videoUrl"], "https://cdn.example.com/clip.mp4");
        assert!(value.get("imageUrl").is_none());
        assert_eq!(value["type"], "painting");
    }
}
