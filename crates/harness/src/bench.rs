use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dmphub_core::{
    base::{Question, Section, Template},
    clock,
    ids::*,
    overlay::*,
    status::{CustomizationStatus, MigrationStatus},
};
use dmphub_engine::{Notifier, StatusChange};
use dmphub_storage::{PublishReceipt, SqliteStore, StoreError};
use tempfile::TempDir;

/// End-to-end fixture: one sqlite store plus helpers that play the template
/// owner (authoring, publishing) and customizing organizations (overlays).
pub struct TestBench {
    pub store: SqliteStore,
    // Held so the database file outlives the bench.
    _dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl TestBench {
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            store: SqliteStore::open_in_memory()?,
            _dir: None,
            path: None,
        })
    }

    /// On-disk variant for tests that need multiple connections (the
    /// worker pool opens one per worker).
    pub fn on_disk() -> Result<Self, StoreError> {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("dmphub.sqlite");
        Ok(Self {
            store: SqliteStore::open(&path)?,
            _dir: Some(dir),
            path: Some(path),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ------------------------------------------------------------------
    // Template owner side
    // ------------------------------------------------------------------

    pub fn create_template(&mut self, name: &str) -> Result<TemplateId, StoreError> {
        let template = Template {
            template_id: TemplateId::new(),
            name: name.into(),
            description: String::new(),
            current_version: 0,
            current_version_id: None,
            deleted: false,
            created_at_ms: clock::now_ms()?,
        };
        self.store.upsert_template(&template)?;
        Ok(template.template_id)
    }

    pub fn add_section(
        &mut self,
        template_id: TemplateId,
        name: &str,
        display_order: i64,
    ) -> Result<SectionId, StoreError> {
        let section = Section {
            section_id: SectionId::new(),
            template_id,
            name: name.into(),
            guidance: String::new(),
            display_order,
            requirements: Vec::new(),
            tags: Vec::new(),
            deleted: false,
        };
        self.store.upsert_section(&section)?;
        Ok(section.section_id)
    }

    pub fn add_question(
        &mut self,
        section_id: SectionId,
        text: &str,
        required: bool,
        display_order: i64,
    ) -> Result<QuestionId, StoreError> {
        let question = Question {
            question_id: QuestionId::new(),
            section_id,
            text: text.into(),
            required,
            display_order,
            options: Vec::new(),
            tags: Vec::new(),
            deleted: false,
        };
        self.store.upsert_question(&question)?;
        Ok(question.question_id)
    }

    pub fn publish(&mut self, template_id: TemplateId) -> Result<PublishReceipt, StoreError> {
        self.store.publish_template(template_id)
    }

    pub fn set_question_required(
        &mut self,
        question_id: QuestionId,
        required: bool,
    ) -> Result<(), StoreError> {
        let mut question = self
            .store
            .get_question(question_id)?
            .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
        question.required = required;
        self.store.upsert_question(&question)
    }

    pub fn rename_section(&mut self, section_id: SectionId, name: &str) -> Result<(), StoreError> {
        let mut section = self
            .store
            .get_section(section_id)?
            .ok_or_else(|| StoreError::NotFound(format!("section {section_id}")))?;
        section.name = name.into();
        self.store.upsert_section(&section)
    }

    pub fn retag_question(
        &mut self,
        question_id: QuestionId,
        tags: Vec<String>,
    ) -> Result<(), StoreError> {
        let mut question = self
            .store
            .get_question(question_id)?
            .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
        question.tags = tags;
        self.store.upsert_question(&question)
    }

    // ------------------------------------------------------------------
    // Organization side
    // ------------------------------------------------------------------

    pub fn customize(&mut self, template_id: TemplateId) -> Result<CustomizationId, StoreError> {
        let customization = TemplateCustomization {
            id: CustomizationId::new(),
            base_template_id: template_id,
            status: CustomizationStatus::Draft,
            migration_status: MigrationStatus::Ok,
            last_reconciled_at: None,
            row_version: 0,
            created_at_ms: clock::now_ms()?,
        };
        self.store.insert_customization(&customization)?;
        Ok(customization.id)
    }

    pub fn add_custom_section(
        &mut self,
        customization_id: CustomizationId,
        follows_section_id: Option<SectionId>,
        name: &str,
    ) -> Result<CustomSectionId, StoreError> {
        let node = CustomSection {
            id: CustomSectionId::new(),
            customization_id,
            follows_section_id,
            name: name.into(),
            migration_status: MigrationStatus::Ok,
            created_at_ms: clock::now_ms()?,
        };
        self.store.insert_custom_section(&node)?;
        Ok(node.id)
    }

    pub fn add_custom_question(
        &mut self,
        customization_id: CustomizationId,
        custom_section_id: Option<CustomSectionId>,
        follows_question_id: Option<QuestionId>,
        text: &str,
    ) -> Result<CustomQuestionId, StoreError> {
        let node = CustomQuestion {
            id: CustomQuestionId::new(),
            customization_id,
            custom_section_id,
            follows_question_id,
            text: text.into(),
            migration_status: MigrationStatus::Ok,
            created_at_ms: clock::now_ms()?,
        };
        self.store.insert_custom_question(&node)?;
        Ok(node.id)
    }

    pub fn customize_section(
        &mut self,
        customization_id: CustomizationId,
        section_id: SectionId,
        guidance: &str,
    ) -> Result<SectionCustomizationId, StoreError> {
        let node = SectionCustomization {
            id: SectionCustomizationId::new(),
            customization_id,
            section_id,
            guidance: guidance.into(),
            migration_status: MigrationStatus::Ok,
            created_at_ms: clock::now_ms()?,
        };
        self.store.insert_section_customization(&node)?;
        Ok(node.id)
    }

    pub fn customize_question(
        &mut self,
        customization_id: CustomizationId,
        question_id: QuestionId,
        guidance: &str,
    ) -> Result<QuestionCustomizationId, StoreError> {
        let node = QuestionCustomization {
            id: QuestionCustomizationId::new(),
            customization_id,
            question_id,
            guidance: guidance.into(),
            migration_status: MigrationStatus::Ok,
            created_at_ms: clock::now_ms()?,
        };
        self.store.insert_question_customization(&node)?;
        Ok(node.id)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of chain rows stored for one node.
    pub fn snapshot_count(&self, node: NodeRef) -> Result<i64, StoreError> {
        let count = self.store.conn().query_row(
            "SELECT COUNT(*) FROM overlay_snapshots WHERE node_kind = ?1 AND node_id = ?2",
            rusqlite::params![node.kind().as_str(), node.id_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of chain rows for one node that are still a head.
    pub fn head_count(&self, node: NodeRef) -> Result<i64, StoreError> {
        let count = self.store.conn().query_row(
            "SELECT COUNT(*) FROM overlay_snapshots
             WHERE node_kind = ?1 AND node_id = ?2 AND current_id IS NULL",
            rusqlite::params![node.kind().as_str(), node.id_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Notifier that appends every status change to a shared buffer.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<StatusChange>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<StatusChange>>> {
        Arc::clone(&self.events)
    }
}

impl Notifier for RecordingNotifier {
    fn customization_changed(&self, change: &StatusChange) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(change.clone());
    }
}
