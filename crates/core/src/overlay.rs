use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;
use crate::status::{CustomizationStatus, MigrationStatus};

/// Root of an organization's overlay on one base template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCustomization {
    pub id: CustomizationId,
    pub base_template_id: TemplateId,
    pub status: CustomizationStatus,
    pub migration_status: MigrationStatus,
    pub last_reconciled_at: Option<i64>,
    /// Optimistic concurrency token, bumped on every committed write.
    pub row_version: i64,
    pub created_at_ms: i64,
}

/// Org-authored section, optionally positioned after a base section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub id: CustomSectionId,
    pub customization_id: CustomizationId,
    pub follows_section_id: Option<SectionId>,
    pub name: String,
    pub migration_status: MigrationStatus,
    pub created_at_ms: i64,
}

/// Org-authored question, owned by the customization directly or by a
/// custom section, optionally positioned after a base question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomQuestion {
    pub id: CustomQuestionId,
    pub customization_id: CustomizationId,
    pub custom_section_id: Option<CustomSectionId>,
    pub follows_question_id: Option<QuestionId>,
    pub text: String,
    pub migration_status: MigrationStatus,
    pub created_at_ms: i64,
}

/// Org edits layered onto an existing base section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionCustomization {
    pub id: SectionCustomizationId,
    pub customization_id: CustomizationId,
    pub section_id: SectionId,
    pub guidance: String,
    pub migration_status: MigrationStatus,
    pub created_at_ms: i64,
}

/// Org edits layered onto an existing base question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionCustomization {
    pub id: QuestionCustomizationId,
    pub customization_id: CustomizationId,
    pub question_id: QuestionId,
    pub guidance: String,
    pub migration_status: MigrationStatus,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Customization,
    CustomSection,
    CustomQuestion,
    SectionCustomization,
    QuestionCustomization,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customization => "customization",
            Self::CustomSection => "custom_section",
            Self::CustomQuestion => "custom_question",
            Self::SectionCustomization => "section_customization",
            Self::QuestionCustomization => "question_customization",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "customization" => Ok(Self::Customization),
            "custom_section" => Ok(Self::CustomSection),
            "custom_question" => Ok(Self::CustomQuestion),
            "section_customization" => Ok(Self::SectionCustomization),
            "question_customization" => Ok(Self::QuestionCustomization),
            _ => Err(CoreError::InvalidData(format!("unknown node kind: {s}"))),
        }
    }
}

/// Typed handle over any overlay node, used for uniform status updates
/// and snapshot chain addressing. Plain ids, never live references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Customization(CustomizationId),
    CustomSection(CustomSectionId),
    CustomQuestion(CustomQuestionId),
    SectionCustomization(SectionCustomizationId),
    QuestionCustomization(QuestionCustomizationId),
}

impl NodeRef {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Customization(_) => NodeKind::Customization,
            Self::CustomSection(_) => NodeKind::CustomSection,
            Self::CustomQuestion(_) => NodeKind::CustomQuestion,
            Self::SectionCustomization(_) => NodeKind::SectionCustomization,
            Self::QuestionCustomization(_) => NodeKind::QuestionCustomization,
        }
    }

    pub fn id_bytes(&self) -> [u8; 16] {
        match self {
            Self::Customization(id) => *id.as_bytes(),
            Self::CustomSection(id) => *id.as_bytes(),
            Self::CustomQuestion(id) => *id.as_bytes(),
            Self::SectionCustomization(id) => *id.as_bytes(),
            Self::QuestionCustomization(id) => *id.as_bytes(),
        }
    }

    pub fn from_parts(kind: NodeKind, bytes: [u8; 16]) -> Self {
        match kind {
            NodeKind::Customization => Self::Customization(CustomizationId::from_bytes(bytes)),
            NodeKind::CustomSection => Self::CustomSection(CustomSectionId::from_bytes(bytes)),
            NodeKind::CustomQuestion => Self::CustomQuestion(CustomQuestionId::from_bytes(bytes)),
            NodeKind::SectionCustomization => {
                Self::SectionCustomization(SectionCustomizationId::from_bytes(bytes))
            }
            NodeKind::QuestionCustomization => {
                Self::QuestionCustomization(QuestionCustomizationId::from_bytes(bytes))
            }
        }
    }
}

/// Org-authored content of an overlay node, as frozen into chain snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeContent {
    Customization {
        base_template_id: TemplateId,
        status: CustomizationStatus,
    },
    CustomSection {
        follows_section_id: Option<SectionId>,
        name: String,
    },
    CustomQuestion {
        custom_section_id: Option<CustomSectionId>,
        follows_question_id: Option<QuestionId>,
        text: String,
    },
    SectionCustomization {
        section_id: SectionId,
        guidance: String,
    },
    QuestionCustomization {
        question_id: QuestionId,
        guidance: String,
    },
}

impl NodeContent {
    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::MalformedSnapshot(e.to_string()))
    }

    pub fn fingerprint(&self) -> Result<[u8; 32], CoreError> {
        Ok(*blake3::hash(&self.to_msgpack()?).as_bytes())
    }
}

impl TemplateCustomization {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Customization(self.id)
    }

    pub fn content(&self) -> NodeContent {
        NodeContent::Customization {
            base_template_id: self.base_template_id,
            status: self.status,
        }
    }
}

impl CustomSection {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::CustomSection(self.id)
    }

    pub fn content(&self) -> NodeContent {
        NodeContent::CustomSection {
            follows_section_id: self.follows_section_id,
            name: self.name.clone(),
        }
    }
}

impl CustomQuestion {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::CustomQuestion(self.id)
    }

    pub fn content(&self) -> NodeContent {
        NodeContent::CustomQuestion {
            custom_section_id: self.custom_section_id,
            follows_question_id: self.follows_question_id,
            text: self.text.clone(),
        }
    }
}

impl SectionCustomization {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::SectionCustomization(self.id)
    }

    pub fn content(&self) -> NodeContent {
        NodeContent::SectionCustomization {
            section_id: self.section_id,
            guidance: self.guidance.clone(),
        }
    }
}

impl QuestionCustomization {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::QuestionCustomization(self.id)
    }

    pub fn content(&self) -> NodeContent {
        NodeContent::QuestionCustomization {
            question_id: self.question_id,
            guidance: self.guidance.clone(),
        }
    }
}

/// One immutable link in an overlay node's version chain.
///
/// `prior_id = None` marks chain genesis. `current_id` is the only mutable
/// column: it is set exactly once, when the chain advances past this row.
/// The chain head is the row whose `current_id` is still `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySnapshot {
    pub snapshot_id: SnapshotId,
    pub node: NodeRef,
    pub prior_id: Option<SnapshotId>,
    pub current_id: Option<SnapshotId>,
    /// The base Versioned* row this snapshot was taken against.
    pub source_version_id: VersionId,
    pub fingerprint: [u8; 32],
    pub payload: Vec<u8>,
    pub created_at_ms: i64,
}
