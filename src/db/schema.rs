//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::CurriculumError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), CurriculumError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(CurriculumError::Internal(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, CurriculumError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), CurriculumError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), CurriculumError> {
    conn.execute_batch(CONTENT_SCHEMA)?;
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(GRANTS_SCHEMA)?;
    conn.execute_batch(UNITS_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), CurriculumError> {
    info!(from = from_version, to = SCHEMA_VERSION, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Content aggregate tables
const CONTENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT,

    -- Unicode-lowercased copies for keyword search
    title_folded TEXT NOT NULL DEFAULT '',
    description_folded TEXT NOT NULL DEFAULT '',

    -- Curriculum coordinates
    key_stage TEXT NOT NULL,
    subject TEXT NOT NULL,
    region TEXT NOT NULL,

    learning_objectives_json TEXT NOT NULL DEFAULT '[]',
    difficulty TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_format TEXT NOT NULL,
    estimated_duration_minutes INTEGER,
    prerequisites_json TEXT NOT NULL DEFAULT '[]',
    related_content_json TEXT NOT NULL DEFAULT '[]',

    -- Lifecycle
    version INTEGER NOT NULL CHECK (version >= 1),
    status TEXT NOT NULL CHECK (status IN ('draft', 'review', 'approved', 'published', 'archived', 'rejected')),
    default_variant_id TEXT NOT NULL,

    -- Analytics (increment only)
    view_count INTEGER NOT NULL DEFAULT 0,
    completion_count INTEGER NOT NULL DEFAULT 0,
    rating_count INTEGER NOT NULL DEFAULT 0,
    rating_sum INTEGER NOT NULL DEFAULT 0,

    -- Authorship
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Topics stored separately for keyword filtering
CREATE TABLE IF NOT EXISTS content_topics (
    content_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    topic_folded TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (content_id, topic),
    FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS content_variants (
    id TEXT PRIMARY KEY NOT NULL,
    content_id TEXT NOT NULL,
    learning_style TEXT NOT NULL,
    body TEXT NOT NULL,
    media_refs_json TEXT NOT NULL DEFAULT '[]',
    interactive_json TEXT,
    version INTEGER NOT NULL CHECK (version >= 1),
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (content_id, learning_style),
    FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS content_assessments (
    content_id TEXT NOT NULL,
    assessment_id TEXT NOT NULL,
    linked_by TEXT NOT NULL,
    linked_at TEXT NOT NULL,
    PRIMARY KEY (content_id, assessment_id),
    FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
);
"#;

/// Append-only ledger; deliberately no foreign key so records outlive content
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    content_id TEXT NOT NULL,
    variant_id TEXT,
    changed_by TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    previous_version INTEGER NOT NULL,
    new_version INTEGER NOT NULL CHECK (new_version = previous_version + 1),
    description TEXT NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('create', 'update', 'status', 'delete'))
);

CREATE TRIGGER IF NOT EXISTS content_changes_no_update
BEFORE UPDATE ON content_changes
BEGIN
    SELECT RAISE(ABORT, 'content_changes is append-only');
END;

CREATE TRIGGER IF NOT EXISTS content_changes_no_delete
BEFORE DELETE ON content_changes
BEGIN
    SELECT RAISE(ABORT, 'content_changes is append-only');
END;
"#;

const GRANTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS permission_grants (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    level TEXT NOT NULL CHECK (level IN ('view', 'comment', 'edit', 'approve', 'admin')),

    -- Exactly one scope column is set
    content_id TEXT,
    subject TEXT,
    key_stage TEXT,

    granted_by TEXT NOT NULL,
    granted_at TEXT NOT NULL,

    CHECK ((content_id IS NOT NULL) + (subject IS NOT NULL) + (key_stage IS NOT NULL) = 1)
);
"#;

const UNITS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS units (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    subject TEXT NOT NULL,
    key_stage TEXT NOT NULL,

    -- Order is consumption order
    content_ids_json TEXT NOT NULL DEFAULT '[]',
    learning_objectives_json TEXT NOT NULL DEFAULT '[]',
    prerequisite_unit_ids_json TEXT NOT NULL DEFAULT '[]',

    version INTEGER NOT NULL CHECK (version >= 1),
    status TEXT NOT NULL CHECK (status IN ('draft', 'review', 'approved', 'published', 'archived', 'rejected')),

    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_content_key_stage ON content(key_stage);
CREATE INDEX IF NOT EXISTS idx_content_subject ON content(subject);
CREATE INDEX IF NOT EXISTS idx_content_status ON content(status);
CREATE INDEX IF NOT EXISTS idx_content_updated_at ON content(updated_at);
CREATE INDEX IF NOT EXISTS idx_content_topics_topic ON content_topics(topic);
CREATE INDEX IF NOT EXISTS idx_variants_content ON content_variants(content_id);
CREATE INDEX IF NOT EXISTS idx_changes_content ON content_changes(content_id, seq);
CREATE INDEX IF NOT EXISTS idx_grants_user ON permission_grants(user_id);
CREATE INDEX IF NOT EXISTS idx_units_subject ON units(subject);
"#;
