use std::collections::BTreeMap;

use dmphub_core::{
    base::{VersionedRecord, VersionedTemplate},
    ids::*,
    overlay::*,
    status::{CustomizationStatus, MigrationStatus},
};

use crate::error::StoreError;

/// One customization and all of its child overlay nodes, loaded in one pass.
#[derive(Debug, Clone)]
pub struct UnitGraph {
    pub customization: TemplateCustomization,
    pub custom_sections: Vec<CustomSection>,
    pub custom_questions: Vec<CustomQuestion>,
    pub section_customizations: Vec<SectionCustomization>,
    pub question_customizations: Vec<QuestionCustomization>,
}

impl UnitGraph {
    /// Number of child nodes under the root.
    pub fn node_count(&self) -> usize {
        self.custom_sections.len()
            + self.custom_questions.len()
            + self.section_customizations.len()
            + self.question_customizations.len()
    }
}

/// A template publication indexed for existence checks and diffing.
/// Section and question records are keyed by their stable base identity.
#[derive(Debug, Clone)]
pub struct PublishedTemplate {
    pub template: VersionedTemplate,
    pub sections: BTreeMap<SectionId, VersionedRecord>,
    pub questions: BTreeMap<QuestionId, VersionedRecord>,
}

/// Receipt of a base-template publication: the durable Versioned* rows the
/// reconciliation engine is told about.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub version_id: VersionId,
    pub version: i64,
    pub section_version_ids: Vec<VersionId>,
    pub question_version_ids: Vec<VersionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatusView {
    pub status: MigrationStatus,
    pub last_reconciled_at: Option<i64>,
}

/// A node's status after evaluation, ready to persist.
#[derive(Debug, Clone)]
pub struct NodeStatusUpdate {
    pub node: NodeRef,
    pub status: MigrationStatus,
}

/// Everything one reconciliation (or overlay publication) unit commits,
/// atomically. Either all of it lands or none of it does.
#[derive(Debug, Clone)]
pub struct UnitCommit {
    pub customization_id: CustomizationId,
    /// Optimistic check: the commit fails with `ConflictingWrite` when the
    /// stored row_version no longer matches.
    pub expected_row_version: i64,
    pub root_status: MigrationStatus,
    /// Overlay lifecycle transition, if any (used by overlay publication).
    pub set_status: Option<CustomizationStatus>,
    pub node_statuses: Vec<NodeStatusUpdate>,
    /// New chain links; each row's `prior_id`, when set, has its
    /// `current_id` advanced to the new row in the same transaction.
    pub new_snapshots: Vec<OverlaySnapshot>,
    pub reconciled_at_ms: Option<i64>,
}

/// Capability-based entity store the engine runs against.
pub trait Store {
    fn list_customizations(
        &self,
        base_template_id: TemplateId,
    ) -> Result<Vec<CustomizationId>, StoreError>;

    fn load_unit(&self, customization_id: CustomizationId) -> Result<UnitGraph, StoreError>;

    /// Load the publication identified by a VersionedTemplate row. Returns
    /// `None` when the row is missing or the base template has been deleted,
    /// which drives the orphaned transition.
    fn load_publication(
        &self,
        version_id: VersionId,
    ) -> Result<Option<PublishedTemplate>, StoreError>;

    /// The latest publication of a base template, if it is live and has one.
    fn current_publication(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<PublishedTemplate>, StoreError>;

    /// The publication immediately preceding `before_version`, if any.
    fn load_prior_publication(
        &self,
        template_id: TemplateId,
        before_version: i64,
    ) -> Result<Option<PublishedTemplate>, StoreError>;

    /// Current head of a node's snapshot chain (`current_id IS NULL`).
    fn chain_head(&self, node: NodeRef) -> Result<Option<OverlaySnapshot>, StoreError>;

    fn commit_unit(&mut self, commit: &UnitCommit) -> Result<(), StoreError>;

    fn get_migration_status(
        &self,
        customization_id: CustomizationId,
    ) -> Result<MigrationStatusView, StoreError>;
}
