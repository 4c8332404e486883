//! Change ledger rows
//!
//! Append-only. The table has triggers rejecting UPDATE and DELETE, and no
//! foreign key to `content`, so history outlives the content it describes.

use rusqlite::{params, Connection, Row};

use crate::error::CurriculumError;
use crate::models::ContentChangeRecord;

use super::{parse_col, to_ts, ts_col, user_col};

fn record_from_row(row: &Row) -> rusqlite::Result<ContentChangeRecord> {
    Ok(ContentChangeRecord {
        id: row.get("id")?,
        content_id: row.get("content_id")?,
        variant_id: row.get("variant_id")?,
        changed_by: user_col(row, "changed_by")?,
        changed_at: ts_col(row, "changed_at")?,
        previous_version: row.get("previous_version")?,
        new_version: row.get("new_version")?,
        description: row.get("description")?,
        change_type: parse_col(row, "change_type")?,
    })
}

/// Append one record
pub fn append(conn: &Connection, record: &ContentChangeRecord) -> Result<(), CurriculumError> {
    conn.execute(
        r#"
        INSERT INTO content_changes (
            id, content_id, variant_id, changed_by, changed_at,
            previous_version, new_version, description, change_type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            record.id,
            record.content_id,
            record.variant_id,
            record.changed_by.as_str(),
            to_ts(&record.changed_at),
            record.previous_version,
            record.new_version,
            record.description,
            record.change_type.as_str(),
        ],
    )?;
    Ok(())
}

/// Highest metadata version the ledger has recorded for `content_id`,
/// including items that have since been deleted
pub fn last_version(conn: &Connection, content_id: &str) -> Result<Option<u32>, CurriculumError> {
    Ok(conn.query_row(
        "SELECT MAX(new_version) FROM content_changes WHERE content_id = ? AND variant_id IS NULL",
        params![content_id],
        |row| row.get(0),
    )?)
}

/// Which records of a content item to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope {
    /// Metadata and variant records
    All,
    /// Records without a variant id
    Metadata,
}

/// Records for a content item in append order
pub fn list_for_content(
    conn: &Connection,
    content_id: &str,
    scope: HistoryScope,
) -> Result<Vec<ContentChangeRecord>, CurriculumError> {
    let sql = match scope {
        HistoryScope::All => {
            "SELECT * FROM content_changes WHERE content_id = ? ORDER BY seq"
        }
        HistoryScope::Metadata => {
            "SELECT * FROM content_changes WHERE content_id = ? AND variant_id IS NULL ORDER BY seq"
        }
    };

    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params![content_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Records for one variant in append order
pub fn list_for_variant(conn: &Connection, variant_id: &str) -> Result<Vec<ContentChangeRecord>, CurriculumError> {
    let mut stmt =
        conn.prepare("SELECT * FROM content_changes WHERE variant_id = ? ORDER BY seq")?;
    let records = stmt
        .query_map(params![variant_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ContentDb;
    use crate::identity::UserId;
    use crate::models::ChangeType;
    use chrono::Duration;

    #[test]
    fn test_chronological_and_scoped_history() {
        let db = ContentDb::open_in_memory().unwrap();
        let user = UserId::new("editor").unwrap();
        let t0 = crate::db::now();

        db.with_conn(|conn| {
            append(conn, &ContentChangeRecord::new("c1", None, &user, t0, 0, ChangeType::Create, "created"))?;
            append(conn, &ContentChangeRecord::new("c1", Some("v2"), &user, t0 + Duration::seconds(1), 0, ChangeType::Create, "visual variant"))?;
            append(conn, &ContentChangeRecord::new("c1", None, &user, t0 + Duration::seconds(2), 1, ChangeType::Status, "Status draft -> review"))?;
            append(conn, &ContentChangeRecord::new("c2", None, &user, t0, 0, ChangeType::Create, "other"))?;
            Ok(())
        })
        .unwrap();

        let all = db.with_conn(|conn| list_for_content(conn, "c1", HistoryScope::All)).unwrap();
        let types: Vec<_> = all.iter().map(|r| r.change_type).collect();
        assert_eq!(types, vec![ChangeType::Create, ChangeType::Create, ChangeType::Status]);

        let metadata = db.with_conn(|conn| list_for_content(conn, "c1", HistoryScope::Metadata)).unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(metadata.iter().all(|r| r.variant_id.is_none()));

        let variant = db.with_conn(|conn| list_for_variant(conn, "v2")).unwrap();
        assert_eq!(variant.len(), 1);
        assert_eq!(variant[0].changed_at, t0 + Duration::seconds(1));
    }

    #[test]
    fn test_history_follows_append_order_not_clock() {
        let db = ContentDb::open_in_memory().unwrap();
        let user = UserId::new("editor").unwrap();
        let t0 = crate::db::now();

        // The wall clock stepped backwards between writes
        db.with_conn(|conn| {
            append(conn, &ContentChangeRecord::new("c1", None, &user, t0, 0, ChangeType::Create, "created"))?;
            append(conn, &ContentChangeRecord::new("c1", None, &user, t0 - Duration::seconds(30), 1, ChangeType::Update, "title"))?;
            append(conn, &ContentChangeRecord::new("c1", None, &user, t0 - Duration::seconds(60), 2, ChangeType::Status, "Status draft -> review"))?;
            Ok(())
        })
        .unwrap();

        let history = db.with_conn(|conn| list_for_content(conn, "c1", HistoryScope::Metadata)).unwrap();
        let versions: Vec<_> = history.iter().map(|r| r.new_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(db.with_conn(|conn| last_version(conn, "c1")).unwrap(), Some(3));
        assert_eq!(db.with_conn(|conn| last_version(conn, "c9")).unwrap(), None);
    }
}
