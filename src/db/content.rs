//! Content metadata, assessment links and analytics rows

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::models::{ContentAnalytics, ContentMetadata, CurriculumContent};
use crate::workflow::WorkflowStatus;

use super::{fold_case, json_col, parse_col, to_ts, ts_col, user_col, variants};

pub(crate) fn metadata_from_row(row: &Row) -> rusqlite::Result<ContentMetadata> {
    Ok(ContentMetadata {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        key_stage: row.get("key_stage")?,
        subject: row.get("subject")?,
        region: row.get("region")?,
        topics: vec![], // Loaded separately
        learning_objectives: json_col(row, "learning_objectives_json")?,
        difficulty: parse_col(row, "difficulty")?,
        content_type: row.get("content_type")?,
        content_format: row.get("content_format")?,
        estimated_duration_minutes: row.get("estimated_duration_minutes")?,
        created_at: ts_col(row, "created_at")?,
        created_by: user_col(row, "created_by")?,
        updated_at: ts_col(row, "updated_at")?,
        updated_by: user_col(row, "updated_by")?,
        version: row.get("version")?,
        status: parse_col(row, "status")?,
        prerequisites: json_col(row, "prerequisites_json")?,
        related_content: json_col(row, "related_content_json")?,
    })
}

fn analytics_from_row(row: &Row) -> rusqlite::Result<ContentAnalytics> {
    let get = |col: &str| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(col)?.max(0) as u64) };
    Ok(ContentAnalytics {
        view_count: get("view_count")?,
        completion_count: get("completion_count")?,
        rating_count: get("rating_count")?,
        rating_sum: get("rating_sum")?,
    })
}

/// Get content metadata by ID
pub fn get_metadata(conn: &Connection, id: &str) -> Result<Option<ContentMetadata>, CurriculumError> {
    let metadata = conn
        .query_row("SELECT * FROM content WHERE id = ?", params![id], metadata_from_row)
        .optional()?;

    match metadata {
        Some(mut metadata) => {
            metadata.topics = get_topics(conn, id)?;
            Ok(Some(metadata))
        }
        None => Ok(None),
    }
}

/// Get content metadata or fail with `NotFound`
pub fn require_metadata(conn: &Connection, id: &str) -> Result<ContentMetadata, CurriculumError> {
    get_metadata(conn, id)?.ok_or_else(|| CurriculumError::NotFound(format!("content {}", id)))
}

/// Get the full aggregate
pub fn get_content(conn: &Connection, id: &str) -> Result<Option<CurriculumContent>, CurriculumError> {
    let Some(metadata) = get_metadata(conn, id)? else {
        return Ok(None);
    };

    let (default_variant_id, analytics) = conn.query_row(
        "SELECT * FROM content WHERE id = ?",
        params![id],
        |row| Ok((row.get::<_, String>("default_variant_id")?, analytics_from_row(row)?)),
    )?;

    let variants = variants::list_variants(conn, id)?;
    if !variants.iter().any(|v| v.id == default_variant_id) {
        return Err(CurriculumError::Internal(format!(
            "content {} points at missing default variant {}",
            id, default_variant_id
        )));
    }

    Ok(Some(CurriculumContent {
        metadata,
        variants,
        default_variant_id,
        assessment_ids: list_assessments(conn, id)?,
        analytics,
    }))
}

pub fn require_content(conn: &Connection, id: &str) -> Result<CurriculumContent, CurriculumError> {
    get_content(conn, id)?.ok_or_else(|| CurriculumError::NotFound(format!("content {}", id)))
}

/// Get topics for a content item
pub fn get_topics(conn: &Connection, content_id: &str) -> Result<Vec<String>, CurriculumError> {
    let mut stmt = conn.prepare("SELECT topic FROM content_topics WHERE content_id = ? ORDER BY rowid")?;
    let topics = stmt
        .query_map(params![content_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(topics)
}

fn replace_topics(conn: &Connection, content_id: &str, topics: &[String]) -> Result<(), CurriculumError> {
    conn.execute("DELETE FROM content_topics WHERE content_id = ?", params![content_id])?;
    for topic in topics {
        conn.execute(
            "INSERT OR IGNORE INTO content_topics (content_id, topic, topic_folded) VALUES (?, ?, ?)",
            params![content_id, topic, fold_case(topic)],
        )?;
    }
    Ok(())
}

/// Insert a new metadata row. The default variant must be inserted in the same transaction.
pub fn insert_metadata(
    conn: &Connection,
    metadata: &ContentMetadata,
    default_variant_id: &str,
) -> Result<(), CurriculumError> {
    let result = conn.execute(
        r#"
        INSERT INTO content (
            id, title, description, title_folded, description_folded,
            key_stage, subject, region,
            learning_objectives_json, difficulty, content_type, content_format,
            estimated_duration_minutes, prerequisites_json, related_content_json,
            version, status, default_variant_id,
            created_by, created_at, updated_by, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            metadata.id,
            metadata.title,
            metadata.description,
            fold_case(&metadata.title),
            fold_case(metadata.description.as_deref().unwrap_or_default()),
            metadata.key_stage,
            metadata.subject,
            metadata.region,
            serde_json::to_string(&metadata.learning_objectives)?,
            metadata.difficulty.as_str(),
            metadata.content_type,
            metadata.content_format,
            metadata.estimated_duration_minutes,
            serde_json::to_string(&metadata.prerequisites)?,
            serde_json::to_string(&metadata.related_content)?,
            metadata.version,
            metadata.status.as_str(),
            default_variant_id,
            metadata.created_by.as_str(),
            to_ts(&metadata.created_at),
            metadata.updated_by.as_str(),
            to_ts(&metadata.updated_at),
        ],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(CurriculumError::Conflict(format!("content {} already exists", metadata.id)));
        }
        Err(e) => return Err(e.into()),
    }

    replace_topics(conn, &metadata.id, &metadata.topics)?;
    debug!(id = %metadata.id, "Inserted content metadata");
    Ok(())
}

/// Write `metadata` over the stored row if the stored version is still `expected_version`
pub fn update_metadata(
    conn: &Connection,
    metadata: &ContentMetadata,
    expected_version: u32,
) -> Result<(), CurriculumError> {
    let changed = conn.execute(
        r#"
        UPDATE content SET
            title = ?, description = ?, title_folded = ?, description_folded = ?,
            key_stage = ?, subject = ?, region = ?,
            learning_objectives_json = ?, difficulty = ?, content_type = ?, content_format = ?,
            estimated_duration_minutes = ?, prerequisites_json = ?, related_content_json = ?,
            version = ?, status = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
        params![
            metadata.title,
            metadata.description,
            fold_case(&metadata.title),
            fold_case(metadata.description.as_deref().unwrap_or_default()),
            metadata.key_stage,
            metadata.subject,
            metadata.region,
            serde_json::to_string(&metadata.learning_objectives)?,
            metadata.difficulty.as_str(),
            metadata.content_type,
            metadata.content_format,
            metadata.estimated_duration_minutes,
            serde_json::to_string(&metadata.prerequisites)?,
            serde_json::to_string(&metadata.related_content)?,
            metadata.version,
            metadata.status.as_str(),
            metadata.updated_by.as_str(),
            to_ts(&metadata.updated_at),
            metadata.id,
            expected_version,
        ],
    )?;

    if changed == 0 {
        return Err(CurriculumError::Conflict(format!(
            "content {} is no longer at version {}",
            metadata.id, expected_version
        )));
    }

    replace_topics(conn, &metadata.id, &metadata.topics)?;
    Ok(())
}

/// Repoint the default variant
pub fn set_default_variant_id(conn: &Connection, id: &str, variant_id: &str) -> Result<(), CurriculumError> {
    conn.execute(
        "UPDATE content SET default_variant_id = ? WHERE id = ?",
        params![variant_id, id],
    )?;
    Ok(())
}

pub fn get_default_variant_id(conn: &Connection, id: &str) -> Result<Option<String>, CurriculumError> {
    Ok(conn
        .query_row(
            "SELECT default_variant_id FROM content WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Hard delete; variants, topics and assessment links cascade, the ledger stays
pub fn delete_content(conn: &Connection, id: &str) -> Result<bool, CurriculumError> {
    let changes = conn.execute("DELETE FROM content WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

/// Check which of `ids` exist
pub fn check_content_exists(conn: &Connection, ids: &[String]) -> Result<Vec<String>, CurriculumError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<_> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT id FROM content WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let existing = stmt
        .query_map(param_refs.as_slice(), |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(existing)
}

/// Status of each requested content id that exists
pub fn get_statuses(
    conn: &Connection,
    ids: &[String],
) -> Result<Vec<(String, WorkflowStatus)>, CurriculumError> {
    let mut stmt = conn.prepare("SELECT status FROM content WHERE id = ?")?;
    let mut statuses = Vec::new();
    for id in ids {
        let status = stmt
            .query_row(params![id], |row| parse_col::<WorkflowStatus>(row, "status"))
            .optional()?;
        if let Some(status) = status {
            statuses.push((id.clone(), status));
        }
    }
    Ok(statuses)
}

// =============================================================================
// Assessment links
// =============================================================================

/// Link an assessment; returns false when the link already existed
pub fn link_assessment(
    conn: &Connection,
    content_id: &str,
    assessment_id: &str,
    linked_by: &UserId,
    linked_at: &chrono::DateTime<chrono::Utc>,
) -> Result<bool, CurriculumError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO content_assessments (content_id, assessment_id, linked_by, linked_at) VALUES (?, ?, ?, ?)",
        params![content_id, assessment_id, linked_by.as_str(), to_ts(linked_at)],
    )?;
    Ok(inserted > 0)
}

pub fn list_assessments(conn: &Connection, content_id: &str) -> Result<Vec<String>, CurriculumError> {
    let mut stmt = conn.prepare(
        "SELECT assessment_id FROM content_assessments WHERE content_id = ? ORDER BY linked_at, rowid",
    )?;
    let ids = stmt
        .query_map(params![content_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

// =============================================================================
// Analytics
// =============================================================================

/// Counter to bump
#[derive(Debug, Clone, Copy)]
pub enum Counter {
    View,
    Completion,
}

pub fn increment(conn: &Connection, content_id: &str, counter: Counter) -> Result<bool, CurriculumError> {
    let sql = match counter {
        Counter::View => "UPDATE content SET view_count = view_count + 1 WHERE id = ?",
        Counter::Completion => "UPDATE content SET completion_count = completion_count + 1 WHERE id = ?",
    };
    Ok(conn.execute(sql, params![content_id])? > 0)
}

pub fn add_rating(conn: &Connection, content_id: &str, rating: u8) -> Result<bool, CurriculumError> {
    let changed = conn.execute(
        "UPDATE content SET rating_count = rating_count + 1, rating_sum = rating_sum + ? WHERE id = ?",
        params![rating as i64, content_id],
    )?;
    Ok(changed > 0)
}

pub fn get_analytics(conn: &Connection, content_id: &str) -> Result<Option<ContentAnalytics>, CurriculumError> {
    Ok(conn
        .query_row(
            "SELECT view_count, completion_count, rating_count, rating_sum FROM content WHERE id = ?",
            params![content_id],
            analytics_from_row,
        )
        .optional()?)
}
