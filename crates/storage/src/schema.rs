use rusqlite::Connection;

use crate::error::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

-- Base (canonical, mutable) entities. Edits here create no history;
-- only publication does.
CREATE TABLE IF NOT EXISTS templates (
    template_id BLOB PRIMARY KEY CHECK (length(template_id) = 16),
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    current_version INTEGER NOT NULL DEFAULT 0,
    current_version_id BLOB CHECK (current_version_id IS NULL OR length(current_version_id) = 16),
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sections (
    section_id BLOB PRIMARY KEY CHECK (length(section_id) = 16),
    template_id BLOB NOT NULL CHECK (length(template_id) = 16),
    name TEXT NOT NULL,
    guidance TEXT NOT NULL DEFAULT '',
    display_order INTEGER NOT NULL DEFAULT 0,
    requirements BLOB NOT NULL,
    tags BLOB NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_sections_template ON sections (template_id) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS questions (
    question_id BLOB PRIMARY KEY CHECK (length(question_id) = 16),
    section_id BLOB NOT NULL CHECK (length(section_id) = 16),
    text TEXT NOT NULL,
    required INTEGER NOT NULL DEFAULT 0,
    display_order INTEGER NOT NULL DEFAULT 0,
    options BLOB NOT NULL,
    tags BLOB NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_questions_section ON questions (section_id) WHERE deleted = 0;

-- Immutable base snapshots, one row per entity per publication.
CREATE TABLE IF NOT EXISTS versioned_templates (
    version_id BLOB PRIMARY KEY CHECK (length(version_id) = 16),
    template_id BLOB NOT NULL CHECK (length(template_id) = 16),
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    UNIQUE (template_id, version)
);

CREATE TABLE IF NOT EXISTS versioned_sections (
    version_id BLOB PRIMARY KEY CHECK (length(version_id) = 16),
    version_template_id BLOB NOT NULL REFERENCES versioned_templates (version_id),
    section_id BLOB NOT NULL CHECK (length(section_id) = 16),
    fingerprint BLOB NOT NULL CHECK (length(fingerprint) = 32),
    payload BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_versioned_sections ON versioned_sections (version_template_id);

CREATE TABLE IF NOT EXISTS versioned_questions (
    version_id BLOB PRIMARY KEY CHECK (length(version_id) = 16),
    version_template_id BLOB NOT NULL REFERENCES versioned_templates (version_id),
    question_id BLOB NOT NULL CHECK (length(question_id) = 16),
    fingerprint BLOB NOT NULL CHECK (length(fingerprint) = 32),
    payload BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_versioned_questions ON versioned_questions (version_template_id);

-- Overlay (organization-owned) entities.
CREATE TABLE IF NOT EXISTS customizations (
    customization_id BLOB PRIMARY KEY CHECK (length(customization_id) = 16),
    base_template_id BLOB NOT NULL CHECK (length(base_template_id) = 16),
    status TEXT NOT NULL DEFAULT 'draft',
    migration_status TEXT NOT NULL DEFAULT 'ok',
    last_reconciled_at INTEGER,
    row_version INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_customizations_base ON customizations (base_template_id);

CREATE TABLE IF NOT EXISTS custom_sections (
    custom_section_id BLOB PRIMARY KEY CHECK (length(custom_section_id) = 16),
    customization_id BLOB NOT NULL REFERENCES customizations (customization_id),
    follows_section_id BLOB CHECK (follows_section_id IS NULL OR length(follows_section_id) = 16),
    name TEXT NOT NULL,
    migration_status TEXT NOT NULL DEFAULT 'ok',
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_custom_sections_parent ON custom_sections (customization_id);

CREATE TABLE IF NOT EXISTS custom_questions (
    custom_question_id BLOB PRIMARY KEY CHECK (length(custom_question_id) = 16),
    customization_id BLOB NOT NULL REFERENCES customizations (customization_id),
    custom_section_id BLOB CHECK (custom_section_id IS NULL OR length(custom_section_id) = 16),
    follows_question_id BLOB CHECK (follows_question_id IS NULL OR length(follows_question_id) = 16),
    text TEXT NOT NULL,
    migration_status TEXT NOT NULL DEFAULT 'ok',
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_custom_questions_parent ON custom_questions (customization_id);

CREATE TABLE IF NOT EXISTS section_customizations (
    section_customization_id BLOB PRIMARY KEY CHECK (length(section_customization_id) = 16),
    customization_id BLOB NOT NULL REFERENCES customizations (customization_id),
    section_id BLOB NOT NULL CHECK (length(section_id) = 16),
    guidance TEXT NOT NULL DEFAULT '',
    migration_status TEXT NOT NULL DEFAULT 'ok',
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_section_customizations_parent ON section_customizations (customization_id);

CREATE TABLE IF NOT EXISTS question_customizations (
    question_customization_id BLOB PRIMARY KEY CHECK (length(question_customization_id) = 16),
    customization_id BLOB NOT NULL REFERENCES customizations (customization_id),
    question_id BLOB NOT NULL CHECK (length(question_id) = 16),
    guidance TEXT NOT NULL DEFAULT '',
    migration_status TEXT NOT NULL DEFAULT 'ok',
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_question_customizations_parent ON question_customizations (customization_id);

-- Append-only arena of overlay snapshot chain links. The UNIQUE on prior_id
-- keeps chains from forking; the partial UNIQUE keeps one head per chain.
CREATE TABLE IF NOT EXISTS overlay_snapshots (
    snapshot_id BLOB PRIMARY KEY CHECK (length(snapshot_id) = 16),
    node_kind TEXT NOT NULL,
    node_id BLOB NOT NULL CHECK (length(node_id) = 16),
    prior_id BLOB UNIQUE CHECK (prior_id IS NULL OR length(prior_id) = 16),
    current_id BLOB CHECK (current_id IS NULL OR length(current_id) = 16),
    source_version_id BLOB NOT NULL CHECK (length(source_version_id) = 16),
    fingerprint BLOB NOT NULL CHECK (length(fingerprint) = 32),
    payload BLOB NOT NULL,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_node ON overlay_snapshots (node_kind, node_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_head
    ON overlay_snapshots (node_kind, node_id) WHERE current_id IS NULL;
";
