use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

/// Canonical, mutable template owned by its publishing organization.
/// Edits do not create history; only publication does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub template_id: TemplateId,
    pub name: String,
    pub description: String,
    /// Highest published version number, 0 before the first publication.
    pub current_version: i64,
    /// VersionedTemplate row of the latest publication, if any.
    pub current_version_id: Option<VersionId>,
    pub deleted: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub section_id: SectionId,
    pub template_id: TemplateId,
    pub name: String,
    pub guidance: String,
    pub display_order: i64,
    pub requirements: Vec<String>,
    pub tags: Vec<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question_id: QuestionId,
    pub section_id: SectionId,
    pub text: String,
    pub required: bool,
    pub display_order: i64,
    pub options: Vec<String>,
    pub tags: Vec<String>,
    pub deleted: bool,
}

/// Immutable snapshot of a template taken at publication time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTemplate {
    pub version_id: VersionId,
    pub template_id: TemplateId,
    pub version: i64,
    pub name: String,
    pub description: String,
    pub created_at_ms: i64,
}

impl VersionedTemplate {
    pub fn tracked(&self) -> TemplateFields {
        TemplateFields {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Immutable snapshot of a section or question taken at publication time.
/// Tracked fields live in the msgpack payload; the fingerprint is blake3
/// over that payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub version_id: VersionId,
    pub fingerprint: [u8; 32],
    pub payload: Vec<u8>,
}

macro_rules! tracked_payload {
    ($name:ident) => {
        impl $name {
            pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
                rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
            }

            pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
                rmp_serde::from_slice(bytes)
                    .map_err(|e| CoreError::MalformedSnapshot(e.to_string()))
            }

            pub fn fingerprint(&self) -> Result<[u8; 32], CoreError> {
                Ok(*blake3::hash(&self.to_msgpack()?).as_bytes())
            }
        }
    };
}

/// Template fields that count for staleness. Bookkeeping columns
/// (ids, timestamps, version counters) never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFields {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFields {
    pub name: String,
    pub guidance: String,
    pub display_order: i64,
    /// Order-sensitive.
    pub requirements: Vec<String>,
    /// Order-insensitive set.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFields {
    pub text: String,
    pub required: bool,
    pub display_order: i64,
    /// Order-sensitive.
    pub options: Vec<String>,
    /// Order-insensitive set.
    pub tags: Vec<String>,
}

tracked_payload!(TemplateFields);
tracked_payload!(SectionFields);
tracked_payload!(QuestionFields);

impl Section {
    pub fn tracked(&self) -> SectionFields {
        SectionFields {
            name: self.name.clone(),
            guidance: self.guidance.clone(),
            display_order: self.display_order,
            requirements: self.requirements.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl Question {
    pub fn tracked(&self) -> QuestionFields {
        QuestionFields {
            text: self.text.clone(),
            required: self.required,
            display_order: self.display_order,
            options: self.options.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let fields = QuestionFields {
            text: "What data will you collect?".into(),
            required: true,
            display_order: 1,
            options: vec!["Survey".into(), "Interview".into()],
            tags: vec!["data".into()],
        };
        let bytes = fields.to_msgpack().unwrap();
        let back = QuestionFields::from_msgpack(&bytes).unwrap();
        assert_eq!(fields, back);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = SectionFields {
            name: "Data Collection".into(),
            guidance: String::new(),
            display_order: 0,
            requirements: vec![],
            tags: vec![],
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        b.guidance = "Describe your instruments".into();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn malformed_payload_is_reported() {
        let err = QuestionFields::from_msgpack(&[0xc1, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, CoreError::MalformedSnapshot(_)));
    }
}
