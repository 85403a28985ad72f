use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use dmphub_core::{
    base::{Question, Section, Template, VersionedRecord, VersionedTemplate},
    clock,
    ids::*,
    overlay::*,
    status::{CustomizationStatus, MigrationStatus},
};

use crate::error::StoreError;
use crate::traits::{
    MigrationStatusView, PublishReceipt, PublishedTemplate, Store, UnitCommit, UnitGraph,
};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StoreError> {
    v.try_into()
        .map_err(|_| StoreError::Serialization(format!("invalid {label} length")))
}

fn encode_list(items: &[String]) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec(items).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_list(bytes: &[u8]) -> Result<Vec<String>, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn opt_id_bytes<T>(id: &Option<T>, f: impl Fn(&T) -> &[u8; 16]) -> Option<Vec<u8>> {
    id.as_ref().map(|v| f(v).to_vec())
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // Base entity authoring (template owner side)
    // ========================================================================

    pub fn upsert_template(&mut self, template: &Template) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO templates (template_id, name, description, current_version, current_version_id, deleted, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(template_id) DO UPDATE SET name = excluded.name, description = excluded.description,
                 deleted = excluded.deleted",
            rusqlite::params![
                template.template_id.as_bytes().as_slice(),
                template.name,
                template.description,
                template.current_version,
                opt_id_bytes(&template.current_version_id, VersionId::as_bytes),
                template.deleted as i64,
                template.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_section(&mut self, section: &Section) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO sections (section_id, template_id, name, guidance, display_order, requirements, tags, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(section_id) DO UPDATE SET name = excluded.name, guidance = excluded.guidance,
                 display_order = excluded.display_order, requirements = excluded.requirements,
                 tags = excluded.tags, deleted = excluded.deleted",
            rusqlite::params![
                section.section_id.as_bytes().as_slice(),
                section.template_id.as_bytes().as_slice(),
                section.name,
                section.guidance,
                section.display_order,
                encode_list(&section.requirements)?,
                encode_list(&section.tags)?,
                section.deleted as i64,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_question(&mut self, question: &Question) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO questions (question_id, section_id, text, required, display_order, options, tags, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(question_id) DO UPDATE SET text = excluded.text, required = excluded.required,
                 display_order = excluded.display_order, options = excluded.options,
                 tags = excluded.tags, deleted = excluded.deleted",
            rusqlite::params![
                question.question_id.as_bytes().as_slice(),
                question.section_id.as_bytes().as_slice(),
                question.text,
                question.required as i64,
                question.display_order,
                encode_list(&question.options)?,
                encode_list(&question.tags)?,
                question.deleted as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_template(&self, template_id: TemplateId) -> Result<Option<Template>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT template_id, name, description, current_version, current_version_id, deleted, created_at_ms
                 FROM templates WHERE template_id = ?1",
                rusqlite::params![template_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<Vec<u8>>>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((tid, name, description, current_version, cvid, deleted, created_at_ms)) => {
                let current_version_id = match cvid {
                    Some(bytes) => Some(VersionId::from_bytes(to_array::<16>(
                        bytes,
                        "current_version_id",
                    )?)),
                    None => None,
                };
                Ok(Some(Template {
                    template_id: TemplateId::from_bytes(to_array::<16>(tid, "template_id")?),
                    name,
                    description,
                    current_version,
                    current_version_id,
                    deleted,
                    created_at_ms,
                }))
            }
        }
    }

    pub fn get_section(&self, section_id: SectionId) -> Result<Option<Section>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT section_id, template_id, name, guidance, display_order, requirements, tags, deleted
                 FROM sections WHERE section_id = ?1",
                rusqlite::params![section_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, Vec<u8>>(6)?,
                        row.get::<_, bool>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((sid, tid, name, guidance, display_order, requirements, tags, deleted)) => {
                Ok(Some(Section {
                    section_id: SectionId::from_bytes(to_array::<16>(sid, "section_id")?),
                    template_id: TemplateId::from_bytes(to_array::<16>(tid, "template_id")?),
                    name,
                    guidance,
                    display_order,
                    requirements: decode_list(&requirements)?,
                    tags: decode_list(&tags)?,
                    deleted,
                }))
            }
        }
    }

    pub fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT question_id, section_id, text, required, display_order, options, tags, deleted
                 FROM questions WHERE question_id = ?1",
                rusqlite::params![question_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, Vec<u8>>(6)?,
                        row.get::<_, bool>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((qid, sid, text, required, display_order, options, tags, deleted)) => {
                Ok(Some(Question {
                    question_id: QuestionId::from_bytes(to_array::<16>(qid, "question_id")?),
                    section_id: SectionId::from_bytes(to_array::<16>(sid, "section_id")?),
                    text,
                    required,
                    display_order,
                    options: decode_list(&options)?,
                    tags: decode_list(&tags)?,
                    deleted,
                }))
            }
        }
    }

    pub fn remove_section(&mut self, section_id: SectionId) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE sections SET deleted = 1 WHERE section_id = ?1",
            rusqlite::params![section_id.as_bytes().as_slice()],
        )?;
        self.conn.execute(
            "UPDATE questions SET deleted = 1 WHERE section_id = ?1",
            rusqlite::params![section_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    pub fn remove_question(&mut self, question_id: QuestionId) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE questions SET deleted = 1 WHERE question_id = ?1",
            rusqlite::params![question_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    /// Soft-delete a template and withdraw its publication. Customizations
    /// tracking it will orphan on the next reconciliation.
    pub fn delete_template(&mut self, template_id: TemplateId) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE templates SET deleted = 1, current_version_id = NULL WHERE template_id = ?1",
            rusqlite::params![template_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    // ========================================================================
    // Publication (stand-in for the external Template Publication Service)
    // ========================================================================

    /// Freeze the current base template into Versioned* rows and advance the
    /// template's current version, all in one transaction. The returned
    /// receipt identifies the durable snapshots a reconciliation run is
    /// handed afterwards.
    pub fn publish_template(
        &mut self,
        template_id: TemplateId,
    ) -> Result<PublishReceipt, StoreError> {
        let template = self
            .get_template(template_id)?
            .filter(|t| !t.deleted)
            .ok_or_else(|| StoreError::NotFound(format!("template {template_id}")))?;

        let sections = self.live_sections(template_id)?;
        let now = clock::now_ms()?;
        let version = template.current_version + 1;
        let version_id = VersionId::new();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO versioned_templates (version_id, template_id, version, name, description, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                version_id.as_bytes().as_slice(),
                template_id.as_bytes().as_slice(),
                version,
                template.name,
                template.description,
                now,
            ],
        )?;

        let mut section_version_ids = Vec::new();
        let mut question_version_ids = Vec::new();
        for section in &sections {
            let fields = section.tracked();
            let payload = fields.to_msgpack()?;
            let fingerprint = fields.fingerprint()?;
            let svid = VersionId::new();
            tx.execute(
                "INSERT INTO versioned_sections (version_id, version_template_id, section_id, fingerprint, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    svid.as_bytes().as_slice(),
                    version_id.as_bytes().as_slice(),
                    section.section_id.as_bytes().as_slice(),
                    fingerprint.as_slice(),
                    payload,
                ],
            )?;
            section_version_ids.push(svid);

            let questions = {
                let mut stmt = tx.prepare(
                    "SELECT question_id, text, required, display_order, options, tags
                     FROM questions WHERE section_id = ?1 AND deleted = 0
                     ORDER BY display_order, question_id",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![section.section_id.as_bytes().as_slice()],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, bool>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Vec<u8>>(4)?,
                            row.get::<_, Vec<u8>>(5)?,
                        ))
                    },
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            for (qid, text, required, display_order, options, tags) in questions {
                let question = Question {
                    question_id: QuestionId::from_bytes(to_array::<16>(qid, "question_id")?),
                    section_id: section.section_id,
                    text,
                    required,
                    display_order,
                    options: decode_list(&options)?,
                    tags: decode_list(&tags)?,
                    deleted: false,
                };
                let fields = question.tracked();
                let payload = fields.to_msgpack()?;
                let fingerprint = fields.fingerprint()?;
                let qvid = VersionId::new();
                tx.execute(
                    "INSERT INTO versioned_questions (version_id, version_template_id, question_id, fingerprint, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        qvid.as_bytes().as_slice(),
                        version_id.as_bytes().as_slice(),
                        question.question_id.as_bytes().as_slice(),
                        fingerprint.as_slice(),
                        payload,
                    ],
                )?;
                question_version_ids.push(qvid);
            }
        }

        tx.execute(
            "UPDATE templates SET current_version = ?1, current_version_id = ?2 WHERE template_id = ?3",
            rusqlite::params![
                version,
                version_id.as_bytes().as_slice(),
                template_id.as_bytes().as_slice(),
            ],
        )?;
        tx.commit()?;

        Ok(PublishReceipt {
            version_id,
            version,
            section_version_ids,
            question_version_ids,
        })
    }

    fn live_sections(&self, template_id: TemplateId) -> Result<Vec<Section>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT section_id, name, guidance, display_order, requirements, tags
             FROM sections WHERE template_id = ?1 AND deleted = 0
             ORDER BY display_order, section_id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![template_id.as_bytes().as_slice()],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (sid, name, guidance, display_order, requirements, tags) = row?;
            result.push(Section {
                section_id: SectionId::from_bytes(to_array::<16>(sid, "section_id")?),
                template_id,
                name,
                guidance,
                display_order,
                requirements: decode_list(&requirements)?,
                tags: decode_list(&tags)?,
                deleted: false,
            });
        }
        Ok(result)
    }

    // ========================================================================
    // Overlay authoring (customizing organization side)
    // ========================================================================

    pub fn insert_customization(
        &mut self,
        customization: &TemplateCustomization,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO customizations (customization_id, base_template_id, status, migration_status, last_reconciled_at, row_version, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                customization.id.as_bytes().as_slice(),
                customization.base_template_id.as_bytes().as_slice(),
                customization.status.as_str(),
                customization.migration_status.as_str(),
                customization.last_reconciled_at,
                customization.row_version,
                customization.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn insert_custom_section(&mut self, node: &CustomSection) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO custom_sections (custom_section_id, customization_id, follows_section_id, name, migration_status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                node.id.as_bytes().as_slice(),
                node.customization_id.as_bytes().as_slice(),
                opt_id_bytes(&node.follows_section_id, SectionId::as_bytes),
                node.name,
                node.migration_status.as_str(),
                node.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn insert_custom_question(&mut self, node: &CustomQuestion) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO custom_questions (custom_question_id, customization_id, custom_section_id, follows_question_id, text, migration_status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                node.id.as_bytes().as_slice(),
                node.customization_id.as_bytes().as_slice(),
                opt_id_bytes(&node.custom_section_id, CustomSectionId::as_bytes),
                opt_id_bytes(&node.follows_question_id, QuestionId::as_bytes),
                node.text,
                node.migration_status.as_str(),
                node.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn insert_section_customization(
        &mut self,
        node: &SectionCustomization,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO section_customizations (section_customization_id, customization_id, section_id, guidance, migration_status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                node.id.as_bytes().as_slice(),
                node.customization_id.as_bytes().as_slice(),
                node.section_id.as_bytes().as_slice(),
                node.guidance,
                node.migration_status.as_str(),
                node.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn insert_question_customization(
        &mut self,
        node: &QuestionCustomization,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO question_customizations (question_customization_id, customization_id, question_id, guidance, migration_status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                node.id.as_bytes().as_slice(),
                node.customization_id.as_bytes().as_slice(),
                node.question_id.as_bytes().as_slice(),
                node.guidance,
                node.migration_status.as_str(),
                node.created_at_ms,
            ],
        )?;
        Ok(())
    }

    fn load_publication_rows(
        &self,
        template: VersionedTemplate,
    ) -> Result<PublishedTemplate, StoreError> {
        let mut sections = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT version_id, section_id, fingerprint, payload
                 FROM versioned_sections WHERE version_template_id = ?1",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![template.version_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )?;
            for row in rows {
                let (vid, sid, fingerprint, payload) = row?;
                sections.insert(
                    SectionId::from_bytes(to_array::<16>(sid, "section_id")?),
                    VersionedRecord {
                        version_id: VersionId::from_bytes(to_array::<16>(vid, "version_id")?),
                        fingerprint: to_array::<32>(fingerprint, "fingerprint")?,
                        payload,
                    },
                );
            }
        }

        let mut questions = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT version_id, question_id, fingerprint, payload
                 FROM versioned_questions WHERE version_template_id = ?1",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![template.version_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )?;
            for row in rows {
                let (vid, qid, fingerprint, payload) = row?;
                questions.insert(
                    QuestionId::from_bytes(to_array::<16>(qid, "question_id")?),
                    VersionedRecord {
                        version_id: VersionId::from_bytes(to_array::<16>(vid, "version_id")?),
                        fingerprint: to_array::<32>(fingerprint, "fingerprint")?,
                        payload,
                    },
                );
            }
        }

        Ok(PublishedTemplate {
            template,
            sections,
            questions,
        })
    }

    fn read_versioned_template(
        &self,
        version_id: VersionId,
    ) -> Result<Option<(VersionedTemplate, bool)>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT vt.version_id, vt.template_id, vt.version, vt.name, vt.description, vt.created_at_ms, t.deleted
                 FROM versioned_templates vt
                 JOIN templates t ON t.template_id = vt.template_id
                 WHERE vt.version_id = ?1",
                rusqlite::params![version_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((vid, tid, version, name, description, created_at_ms, deleted)) => Ok(Some((
                VersionedTemplate {
                    version_id: VersionId::from_bytes(to_array::<16>(vid, "version_id")?),
                    template_id: TemplateId::from_bytes(to_array::<16>(tid, "template_id")?),
                    version,
                    name,
                    description,
                    created_at_ms,
                },
                deleted,
            ))),
        }
    }
}

fn read_status(s: &str) -> Result<MigrationStatus, StoreError> {
    Ok(MigrationStatus::parse(s)?)
}

/// (table, id column) for each overlay node table.
fn node_table(kind: NodeKind) -> (&'static str, &'static str) {
    match kind {
        NodeKind::Customization => ("customizations", "customization_id"),
        NodeKind::CustomSection => ("custom_sections", "custom_section_id"),
        NodeKind::CustomQuestion => ("custom_questions", "custom_question_id"),
        NodeKind::SectionCustomization => ("section_customizations", "section_customization_id"),
        NodeKind::QuestionCustomization => ("question_customizations", "question_customization_id"),
    }
}

impl Store for SqliteStore {
    fn list_customizations(
        &self,
        base_template_id: TemplateId,
    ) -> Result<Vec<CustomizationId>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT customization_id FROM customizations WHERE base_template_id = ?1
             ORDER BY created_at_ms, customization_id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![base_template_id.as_bytes().as_slice()],
            |row| row.get::<_, Vec<u8>>(0),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(CustomizationId::from_bytes(to_array::<16>(
                row?,
                "customization_id",
            )?));
        }
        Ok(result)
    }

    fn load_unit(&self, customization_id: CustomizationId) -> Result<UnitGraph, StoreError> {
        let cid = customization_id.as_bytes().as_slice();
        let customization = self
            .conn
            .query_row(
                "SELECT base_template_id, status, migration_status, last_reconciled_at, row_version, created_at_ms
                 FROM customizations WHERE customization_id = ?1",
                rusqlite::params![cid],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("customization {customization_id}")))?;

        let (tid, status, migration_status, last_reconciled_at, row_version, created_at_ms) =
            customization;
        let customization = TemplateCustomization {
            id: customization_id,
            base_template_id: TemplateId::from_bytes(to_array::<16>(tid, "base_template_id")?),
            status: CustomizationStatus::parse(&status)?,
            migration_status: read_status(&migration_status)?,
            last_reconciled_at,
            row_version,
            created_at_ms,
        };

        let mut custom_sections = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT custom_section_id, follows_section_id, name, migration_status, created_at_ms
                 FROM custom_sections WHERE customization_id = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![cid], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            for row in rows {
                let (id, follows, name, status, created_at_ms) = row?;
                let follows_section_id = match follows {
                    Some(bytes) => Some(SectionId::from_bytes(to_array::<16>(
                        bytes,
                        "follows_section_id",
                    )?)),
                    None => None,
                };
                custom_sections.push(CustomSection {
                    id: CustomSectionId::from_bytes(to_array::<16>(id, "custom_section_id")?),
                    customization_id,
                    follows_section_id,
                    name,
                    migration_status: read_status(&status)?,
                    created_at_ms,
                });
            }
        }

        let mut custom_questions = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT custom_question_id, custom_section_id, follows_question_id, text, migration_status, created_at_ms
                 FROM custom_questions WHERE customization_id = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![cid], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;
            for row in rows {
                let (id, parent, follows, text, status, created_at_ms) = row?;
                let custom_section_id = match parent {
                    Some(bytes) => Some(CustomSectionId::from_bytes(to_array::<16>(
                        bytes,
                        "custom_section_id",
                    )?)),
                    None => None,
                };
                let follows_question_id = match follows {
                    Some(bytes) => Some(QuestionId::from_bytes(to_array::<16>(
                        bytes,
                        "follows_question_id",
                    )?)),
                    None => None,
                };
                custom_questions.push(CustomQuestion {
                    id: CustomQuestionId::from_bytes(to_array::<16>(id, "custom_question_id")?),
                    customization_id,
                    custom_section_id,
                    follows_question_id,
                    text,
                    migration_status: read_status(&status)?,
                    created_at_ms,
                });
            }
        }

        let mut section_customizations = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT section_customization_id, section_id, guidance, migration_status, created_at_ms
                 FROM section_customizations WHERE customization_id = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![cid], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            for row in rows {
                let (id, sid, guidance, status, created_at_ms) = row?;
                section_customizations.push(SectionCustomization {
                    id: SectionCustomizationId::from_bytes(to_array::<16>(
                        id,
                        "section_customization_id",
                    )?),
                    customization_id,
                    section_id: SectionId::from_bytes(to_array::<16>(sid, "section_id")?),
                    guidance,
                    migration_status: read_status(&status)?,
                    created_at_ms,
                });
            }
        }

        let mut question_customizations = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT question_customization_id, question_id, guidance, migration_status, created_at_ms
                 FROM question_customizations WHERE customization_id = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![cid], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            for row in rows {
                let (id, qid, guidance, status, created_at_ms) = row?;
                question_customizations.push(QuestionCustomization {
                    id: QuestionCustomizationId::from_bytes(to_array::<16>(
                        id,
                        "question_customization_id",
                    )?),
                    customization_id,
                    question_id: QuestionId::from_bytes(to_array::<16>(qid, "question_id")?),
                    guidance,
                    migration_status: read_status(&status)?,
                    created_at_ms,
                });
            }
        }

        Ok(UnitGraph {
            customization,
            custom_sections,
            custom_questions,
            section_customizations,
            question_customizations,
        })
    }

    fn load_publication(
        &self,
        version_id: VersionId,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        match self.read_versioned_template(version_id)? {
            None => Ok(None),
            Some((_, true)) => Ok(None),
            Some((template, false)) => Ok(Some(self.load_publication_rows(template)?)),
        }
    }

    fn current_publication(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        match self.get_template(template_id)? {
            Some(t) if !t.deleted => match t.current_version_id {
                Some(version_id) => self.load_publication(version_id),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn load_prior_publication(
        &self,
        template_id: TemplateId,
        before_version: i64,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        let vid = self
            .conn
            .query_row(
                "SELECT version_id FROM versioned_templates
                 WHERE template_id = ?1 AND version < ?2
                 ORDER BY version DESC LIMIT 1",
                rusqlite::params![template_id.as_bytes().as_slice(), before_version],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;

        match vid {
            None => Ok(None),
            Some(bytes) => {
                let version_id = VersionId::from_bytes(to_array::<16>(bytes, "version_id")?);
                match self.read_versioned_template(version_id)? {
                    // deleted flag is irrelevant for the old side of a diff
                    Some((template, _)) => Ok(Some(self.load_publication_rows(template)?)),
                    None => Ok(None),
                }
            }
        }
    }

    fn chain_head(&self, node: NodeRef) -> Result<Option<OverlaySnapshot>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT snapshot_id, prior_id, source_version_id, fingerprint, payload, created_at_ms
                 FROM overlay_snapshots
                 WHERE node_kind = ?1 AND node_id = ?2 AND current_id IS NULL",
                rusqlite::params![node.kind().as_str(), node.id_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((sid, prior, svid, fingerprint, payload, created_at_ms)) => {
                let prior_id = match prior {
                    Some(bytes) => Some(SnapshotId::from_bytes(to_array::<16>(bytes, "prior_id")?)),
                    None => None,
                };
                Ok(Some(OverlaySnapshot {
                    snapshot_id: SnapshotId::from_bytes(to_array::<16>(sid, "snapshot_id")?),
                    node,
                    prior_id,
                    current_id: None,
                    source_version_id: VersionId::from_bytes(to_array::<16>(
                        svid,
                        "source_version_id",
                    )?),
                    fingerprint: to_array::<32>(fingerprint, "fingerprint")?,
                    payload,
                    created_at_ms,
                }))
            }
        }
    }

    fn commit_unit(&mut self, commit: &UnitCommit) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        let affected = tx.execute(
            "UPDATE customizations SET migration_status = ?1,
                 last_reconciled_at = COALESCE(?2, last_reconciled_at),
                 status = COALESCE(?3, status),
                 row_version = row_version + 1
             WHERE customization_id = ?4 AND row_version = ?5",
            rusqlite::params![
                commit.root_status.as_str(),
                commit.reconciled_at_ms,
                commit.set_status.map(|s| s.as_str()),
                commit.customization_id.as_bytes().as_slice(),
                commit.expected_row_version,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::ConflictingWrite {
                customization_id: commit.customization_id.to_string(),
                expected: commit.expected_row_version,
            });
        }

        for update in &commit.node_statuses {
            let (table, id_col) = node_table(update.node.kind());
            tx.execute(
                &format!("UPDATE {table} SET migration_status = ?1 WHERE {id_col} = ?2"),
                rusqlite::params![update.status.as_str(), update.node.id_bytes().as_slice()],
            )?;
        }

        for snapshot in &commit.new_snapshots {
            // Advance the prior head first; inserting the new head before the
            // old one is retired would trip the one-head-per-chain index.
            if let Some(prior_id) = snapshot.prior_id {
                let advanced = tx.execute(
                    "UPDATE overlay_snapshots SET current_id = ?1
                     WHERE snapshot_id = ?2 AND current_id IS NULL",
                    rusqlite::params![
                        snapshot.snapshot_id.as_bytes().as_slice(),
                        prior_id.as_bytes().as_slice(),
                    ],
                )?;
                if advanced == 0 {
                    return Err(StoreError::ConflictingWrite {
                        customization_id: commit.customization_id.to_string(),
                        expected: commit.expected_row_version,
                    });
                }
            }

            let result = tx.execute(
                "INSERT INTO overlay_snapshots (snapshot_id, node_kind, node_id, prior_id, current_id, source_version_id, fingerprint, payload, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    snapshot.snapshot_id.as_bytes().as_slice(),
                    snapshot.node.kind().as_str(),
                    snapshot.node.id_bytes().as_slice(),
                    snapshot.prior_id.as_ref().map(|p| p.as_bytes().to_vec()),
                    snapshot.source_version_id.as_bytes().as_slice(),
                    snapshot.fingerprint.as_slice(),
                    snapshot.payload,
                    snapshot.created_at_ms,
                ],
            );
            match result {
                Ok(_) => {}
                // A duplicate prior_id or second head means another writer
                // advanced this chain underneath us.
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::ConflictingWrite {
                        customization_id: commit.customization_id.to_string(),
                        expected: commit.expected_row_version,
                    });
                }
                Err(e) => return Err(StoreError::Sqlite(e)),
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_migration_status(
        &self,
        customization_id: CustomizationId,
    ) -> Result<MigrationStatusView, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT migration_status, last_reconciled_at FROM customizations WHERE customization_id = ?1",
                rusqlite::params![customization_id.as_bytes().as_slice()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("customization {customization_id}")))?;

        Ok(MigrationStatusView {
            status: read_status(&row.0)?,
            last_reconciled_at: row.1,
        })
    }
}
