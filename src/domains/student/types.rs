use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::reconcile::Record;
use crate::domains::sync::uploader::MediaBlob;
use crate::errors::DomainResult;
use crate::types::{coerce_created_at, coerce_local_only, generate_record_id};
use crate::validation::{Validate, ValidationBuilder};

/// Id prefix for locally-generated student records.
pub const STUDENT_ID_PREFIX: &str = "student";

/// Canonical student record. Every (de)serialization routes through
/// [`StudentDoc`], so a `Student` always has an id, a numeric `createdAt`
/// and a strict `localOnly` flag no matter how loose the source was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StudentDoc", into = "StudentDoc")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Durable remote url, or an embedded-binary placeholder awaiting upload.
    pub cover_url: String,
    /// Milliseconds since the epoch.
    pub created_at: i64,
    /// True while the record exists only in the local cache.
    pub local_only: bool,
}

impl Record for Student {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn created_at_millis(&self) -> i64 {
        self.created_at
    }
}

/// Loose student document as it arrives from the remote store, the local
/// cache or user input. All fields are optional or defaulted; `createdAt`
/// stays raw JSON until canonicalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    pub cover_url: String,
    pub created_at: Value,
    pub local_only: Value,
}

impl From<StudentDoc> for Student {
    fn from(doc: StudentDoc) -> Self {
        Student {
            id: doc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| generate_record_id(STUDENT_ID_PREFIX)),
            name: doc.name,
            category: doc.category,
            cover_url: doc.cover_url,
            created_at: coerce_created_at(Some(&doc.created_at)),
            local_only: coerce_local_only(&doc.local_only),
        }
    }
}

impl From<Student> for StudentDoc {
    fn from(student: Student) -> Self {
        StudentDoc {
            id: Some(student.id),
            name: student.name,
            category: student.category,
            cover_url: student.cover_url,
            created_at: Value::from(student.created_at),
            local_only: Value::from(student.local_only),
        }
    }
}

/// Input for creating a student.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub category: String,
    pub cover: MediaBlob,
}

impl Validate for NewStudent {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("name", Some(&self.name))
            .required()
            .max_length(200)
            .validate()?;
        ValidationBuilder::new("category", Some(&self.category))
            .required()
            .max_length(200)
            .validate()
    }
}

/// Partial update for a student. `id` and `createdAt` may be present in a
/// caller's payload but are never applied: identity and the creation
/// instant are immutable once assigned.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateStudent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub cover_url: Option<String>,
    pub created_at: Option<Value>,
    pub local_only: Option<bool>,
}

impl UpdateStudent {
    pub fn apply(&self, current: &Student) -> Student {
        Student {
            id: current.id.clone(),
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            category: self
                .category
                .clone()
                .unwrap_or_else(|| current.category.clone()),
            cover_url: self
                .cover_url
                .clone()
                .unwrap_or_else(|| current.cover_url.clone()),
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
    fn sanitizes_loose_input() {
        let student: Student = serde_json::from_value(json!({
            "name": "Lina",
            "createdAt": {"seconds": 1700000000},
            "localOnly": "yes"
        }))
        .unwrap();
        assert!(student.id.starts_with("student-"));
        assert_eq!(student.name, "Lina");
        assert_eq!(student.category, "");
        assert_eq!(student.created_at, 1700000000000);
        assert!(!student.local_only);
    }

    #[test]
    fn serializes_to_camel_case_doc() {
        let student = Student {
            id: "student-1".into(),
            name: "Lina".into(),
            category: "Art".into(),
            cover_url: "https://cdn.example.com/1.png".into(),
            created_at: 42,
            local_only: true,
        };
        let value = serde_json::to_value(&student).unwrap();
        assert_eq!(value["coverUrl"], "https://cdn.example.com/1.png");
        assert_eq!(value["createdAt"], 42);
        assert_eq!(value["localOnly"], true);
    }

    #[test]
    fn update_never_touches_identity_or_creation_instant() {
        let current = Student {
            id: "student-1".into(),
            name: "Lina".into(),
            category: "Art".into(),
            cover_url: "cover".into(),
            created_at: 42,
            local_only: false,
        };
        let updates: UpdateStudent = serde_json::from_value(json!({
            "id": "student-forged",
            "createdAt": 9999,
            "name": "X"
        }))
        .unwrap();
        let updated = updates.apply(&current);
        assert_eq!(updated.id, "student-1");
        assert_eq!(updated.created_at, 42);
        assert_eq!(updated.name, "X");
        assert_eq!(updated.category, "Art");
    }
}
