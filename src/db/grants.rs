//! Permission grant rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::permissions::{PermissionScope, UserContentPermission};

use super::{conversion_error, parse_col, to_ts, ts_col, user_col};

fn grant_from_row(row: &Row) -> rusqlite::Result<UserContentPermission> {
    let content_id: Option<String> = row.get("content_id")?;
    let subject: Option<String> = row.get("subject")?;
    let key_stage: Option<String> = row.get("key_stage")?;
    let scope = PermissionScope::from_fields(
        content_id.as_deref(),
        subject.as_deref(),
        key_stage.as_deref(),
    )
    .map_err(conversion_error)?;

    Ok(UserContentPermission {
        id: row.get("id")?,
        user_id: user_col(row, "user_id")?,
        level: parse_col(row, "level")?,
        scope,
        granted_by: user_col(row, "granted_by")?,
        granted_at: ts_col(row, "granted_at")?,
    })
}

fn scope_columns(scope: &PermissionScope) -> (Option<&str>, Option<&str>, Option<&str>) {
    match scope {
        PermissionScope::Content(id) => (Some(id.as_str()), None, None),
        PermissionScope::Subject(subject) => (None, Some(subject.as_str()), None),
        PermissionScope::KeyStage(key_stage) => (None, None, Some(key_stage.as_str())),
    }
}

pub fn insert_grant(conn: &Connection, grant: &UserContentPermission) -> Result<(), CurriculumError> {
    let (content_id, subject, key_stage) = scope_columns(&grant.scope);
    conn.execute(
        r#"
        INSERT INTO permission_grants (
            id, user_id, level, content_id, subject, key_stage, granted_by, granted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            grant.id,
            grant.user_id.as_str(),
            grant.level.as_str(),
            content_id,
            subject,
            key_stage,
            grant.granted_by.as_str(),
            to_ts(&grant.granted_at),
        ],
    )?;
    Ok(())
}

/// All grants held by a user, oldest first
pub fn list_for_user(conn: &Connection, user: &UserId) -> Result<Vec<UserContentPermission>, CurriculumError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM permission_grants WHERE user_id = ? ORDER BY granted_at, rowid",
    )?;
    let grants = stmt
        .query_map(params![user.as_str()], grant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grants)
}

pub fn list_all(conn: &Connection) -> Result<Vec<UserContentPermission>, CurriculumError> {
    let mut stmt = conn.prepare("SELECT * FROM permission_grants ORDER BY granted_at, rowid")?;
    let grants = stmt
        .query_map([], grant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grants)
}

pub fn get_grant(conn: &Connection, grant_id: &str) -> Result<Option<UserContentPermission>, CurriculumError> {
    Ok(conn
        .query_row(
            "SELECT * FROM permission_grants WHERE id = ?",
            params![grant_id],
            grant_from_row,
        )
        .optional()?)
}

/// Whether anyone holds `admin` at exactly `scope`
pub fn admin_exists_at(conn: &Connection, scope: &PermissionScope) -> Result<bool, CurriculumError> {
    let (content_id, subject, key_stage) = scope_columns(scope);
    let mut stmt = conn.prepare(
        r#"
        SELECT 1 FROM permission_grants
        WHERE level = 'admin' AND content_id IS ? AND subject IS ? AND key_stage IS ?
        "#,
    )?;
    Ok(stmt.exists(params![content_id, subject, key_stage])?)
}

/// Remove a grant by id; returns false if it did not exist
pub fn delete_grant(conn: &Connection, grant_id: &str) -> Result<bool, CurriculumError> {
    Ok(conn.execute("DELETE FROM permission_grants WHERE id = ?", params![grant_id])? > 0)
}
