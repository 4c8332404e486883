//! Curriculum unit rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CurriculumError;
use crate::models::CurriculumUnit;

use super::{json_col, parse_col, to_ts, ts_col, user_col};

fn unit_from_row(row: &Row) -> rusqlite::Result<CurriculumUnit> {
    Ok(CurriculumUnit {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        subject: row.get("subject")?,
        key_stage: row.get("key_stage")?,
        content_ids: json_col(row, "content_ids_json")?,
        learning_objectives: json_col(row, "learning_objectives_json")?,
        prerequisite_unit_ids: json_col(row, "prerequisite_unit_ids_json")?,
        created_at: ts_col(row, "created_at")?,
        created_by: user_col(row, "created_by")?,
        updated_at: ts_col(row, "updated_at")?,
        updated_by: user_col(row, "updated_by")?,
        version: row.get("version")?,
        status: parse_col(row, "status")?,
    })
}

pub fn insert_unit(conn: &Connection, unit: &CurriculumUnit) -> Result<(), CurriculumError> {
    let result = conn.execute(
        r#"
        INSERT INTO units (
            id, title, description, subject, key_stage,
            content_ids_json, learning_objectives_json, prerequisite_unit_ids_json,
            version, status, created_by, created_at, updated_by, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            unit.id,
            unit.title,
            unit.description,
            unit.subject,
            unit.key_stage,
            serde_json::to_string(&unit.content_ids)?,
            serde_json::to_string(&unit.learning_objectives)?,
            serde_json::to_string(&unit.prerequisite_unit_ids)?,
            unit.version,
            unit.status.as_str(),
            unit.created_by.as_str(),
            to_ts(&unit.created_at),
            unit.updated_by.as_str(),
            to_ts(&unit.updated_at),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(CurriculumError::Conflict(format!("unit {} already exists", unit.id)))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_unit(conn: &Connection, id: &str) -> Result<Option<CurriculumUnit>, CurriculumError> {
    Ok(conn
        .query_row("SELECT * FROM units WHERE id = ?", params![id], unit_from_row)
        .optional()?)
}

pub fn require_unit(conn: &Connection, id: &str) -> Result<CurriculumUnit, CurriculumError> {
    get_unit(conn, id)?.ok_or_else(|| CurriculumError::NotFound(format!("unit {}", id)))
}

/// Units ordered by creation
pub fn list_units(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<CurriculumUnit>, CurriculumError> {
    let mut stmt = conn.prepare("SELECT * FROM units ORDER BY created_at, id LIMIT ? OFFSET ?")?;
    let units = stmt
        .query_map(params![limit as i64, offset as i64], unit_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(units)
}

/// Write `unit` over the stored row if the stored version is still `expected_version`
pub fn update_unit(
    conn: &Connection,
    unit: &CurriculumUnit,
    expected_version: u32,
) -> Result<(), CurriculumError> {
    let changed = conn.execute(
        r#"
        UPDATE units SET
            title = ?, description = ?, subject = ?, key_stage = ?,
            content_ids_json = ?, learning_objectives_json = ?, prerequisite_unit_ids_json = ?,
            version = ?, status = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
        params![
            unit.title,
            unit.description,
            unit.subject,
            unit.key_stage,
            serde_json::to_string(&unit.content_ids)?,
            serde_json::to_string(&unit.learning_objectives)?,
            serde_json::to_string(&unit.prerequisite_unit_ids)?,
            unit.version,
            unit.status.as_str(),
            unit.updated_by.as_str(),
            to_ts(&unit.updated_at),
            unit.id,
            expected_version,
        ],
    )?;

    if changed == 0 {
        return Err(CurriculumError::Conflict(format!(
            "unit {} is no longer at version {}",
            unit.id, expected_version
        )));
    }
    Ok(())
}

pub fn delete_unit(conn: &Connection, id: &str) -> Result<bool, CurriculumError> {
    Ok(conn.execute("DELETE FROM units WHERE id = ?", params![id])? > 0)
}

/// Prerequisite edges of one unit, empty when the unit does not exist
pub fn prerequisites_of(conn: &Connection, id: &str) -> Result<Vec<String>, CurriculumError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT prerequisite_unit_ids_json FROM units WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(vec![]),
    }
}

/// Which of `ids` are stored units
pub fn existing_unit_ids(conn: &Connection, ids: &[String]) -> Result<Vec<String>, CurriculumError> {
    let mut stmt = conn.prepare("SELECT 1 FROM units WHERE id = ?")?;
    let mut existing = vec![];
    for id in ids {
        if stmt.exists(params![id])? {
            existing.push(id.clone());
        }
    }
    Ok(existing)
}
