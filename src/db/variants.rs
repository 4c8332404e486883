//! Content variant rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CurriculumError;
use crate::models::{ContentVariant, LearningStyle};

use super::{json_col, opt_json_col, parse_col, to_ts, ts_col, user_col};

fn variant_from_row(row: &Row) -> rusqlite::Result<ContentVariant> {
    Ok(ContentVariant {
        id: row.get("id")?,
        content_id: row.get("content_id")?,
        learning_style: parse_col(row, "learning_style")?,
        body: row.get("body")?,
        media_refs: json_col(row, "media_refs_json")?,
        interactive: opt_json_col(row, "interactive_json")?,
        created_at: ts_col(row, "created_at")?,
        created_by: user_col(row, "created_by")?,
        updated_at: ts_col(row, "updated_at")?,
        updated_by: user_col(row, "updated_by")?,
        version: row.get("version")?,
    })
}

/// All variants of a content item, oldest first
pub fn list_variants(conn: &Connection, content_id: &str) -> Result<Vec<ContentVariant>, CurriculumError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM content_variants WHERE content_id = ? ORDER BY created_at, rowid",
    )?;
    let variants = stmt
        .query_map(params![content_id], variant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(variants)
}

pub fn get_variant_by_style(
    conn: &Connection,
    content_id: &str,
    style: LearningStyle,
) -> Result<Option<ContentVariant>, CurriculumError> {
    Ok(conn
        .query_row(
            "SELECT * FROM content_variants WHERE content_id = ? AND learning_style = ?",
            params![content_id, style.as_str()],
            variant_from_row,
        )
        .optional()?)
}

pub fn get_variant(conn: &Connection, variant_id: &str) -> Result<Option<ContentVariant>, CurriculumError> {
    Ok(conn
        .query_row(
            "SELECT * FROM content_variants WHERE id = ?",
            params![variant_id],
            variant_from_row,
        )
        .optional()?)
}

/// Insert a variant; a second variant for the same style is a conflict
pub fn insert_variant(conn: &Connection, variant: &ContentVariant) -> Result<(), CurriculumError> {
    let interactive = variant
        .interactive
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = conn.execute(
        r#"
        INSERT INTO content_variants (
            id, content_id, learning_style, body, media_refs_json, interactive_json,
            version, created_by, created_at, updated_by, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            variant.id,
            variant.content_id,
            variant.learning_style.as_str(),
            variant.body,
            serde_json::to_string(&variant.media_refs)?,
            interactive,
            variant.version,
            variant.created_by.as_str(),
            to_ts(&variant.created_at),
            variant.updated_by.as_str(),
            to_ts(&variant.updated_at),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(CurriculumError::Conflict(format!(
                "content {} already has a {} variant",
                variant.content_id, variant.learning_style
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace a variant in place if it is still at `expected_version`
pub fn update_variant(
    conn: &Connection,
    variant: &ContentVariant,
    expected_version: u32,
) -> Result<(), CurriculumError> {
    let interactive = variant
        .interactive
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let changed = conn.execute(
        r#"
        UPDATE content_variants SET
            body = ?, media_refs_json = ?, interactive_json = ?,
            version = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
        params![
            variant.body,
            serde_json::to_string(&variant.media_refs)?,
            interactive,
            variant.version,
            variant.updated_by.as_str(),
            to_ts(&variant.updated_at),
            variant.id,
            expected_version,
        ],
    )?;

    if changed == 0 {
        return Err(CurriculumError::Conflict(format!(
            "variant {} is no longer at version {}",
            variant.id, expected_version
        )));
    }
    Ok(())
}

pub fn delete_variant(conn: &Connection, variant_id: &str) -> Result<bool, CurriculumError> {
    Ok(conn.execute("DELETE FROM content_variants WHERE id = ?", params![variant_id])? > 0)
}
