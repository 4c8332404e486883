//! Workflow service - status transitions of content items

use std::sync::Arc;

use tracing::info;

use crate::db::{self, changes, content, ContentDb};
use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::locks::{content_key, KeyedLocks};
use crate::models::{ChangeType, ContentChangeRecord, ContentMetadata};
use crate::permissions;
use crate::workflow::{self, WorkflowStatus};

use super::events::{CurriculumEvent, EventBus};

pub struct WorkflowService {
    db: Arc<ContentDb>,
    locks: Arc<KeyedLocks>,
    events: Arc<EventBus>,
}

impl WorkflowService {
    pub fn new(db: Arc<ContentDb>, locks: Arc<KeyedLocks>, events: Arc<EventBus>) -> Self {
        Self { db, locks, events }
    }

    /// Move a content item to `to`.
    ///
    /// The source status is read under the item's lock, so of two concurrent
    /// requests for the same edge the second sees the first's result and fails
    /// with `InvalidTransition`.
    pub async fn transition(
        &self,
        content_id: &str,
        to: WorkflowStatus,
        user: &UserId,
        comment: Option<&str>,
    ) -> Result<ContentMetadata, CurriculumError> {
        let _guard = self.locks.acquire(&content_key(content_id)).await?;
        let now = db::now();

        let (from, updated) = self.db.transaction(|tx| {
            let current = content::require_metadata(tx, content_id)?;
            let target = current.content_ref();
            let level = permissions::effective_level(tx, user, &target)?;
            workflow::check(current.status, to, level, comment, user.as_str(), &target.to_string())?;

            let mut next = current.clone();
            next.status = to;
            next.version = current.version + 1;
            next.updated_at = now;
            next.updated_by = user.clone();

            content::update_metadata(tx, &next, current.version)?;
            changes::append(
                tx,
                &ContentChangeRecord::new(
                    content_id,
                    None,
                    user,
                    now,
                    current.version,
                    ChangeType::Status,
                    workflow::describe(current.status, to, comment),
                ),
            )?;
            Ok((current.status, next))
        })?;

        info!(id = %content_id, from = %from, to = %to, by = %user, "Status changed");
        self.events.emit(CurriculumEvent::StatusChanged {
            id: content_id.to_string(),
            from,
            to,
            by: user.to_string(),
        });

        Ok(updated)
    }

    /// Statuses `user` may move the item to from its current status
    pub fn allowed_transitions(
        &self,
        content_id: &str,
        user: &UserId,
    ) -> Result<Vec<WorkflowStatus>, CurriculumError> {
        self.db.with_conn(|conn| {
            let current = content::require_metadata(conn, content_id)?;
            let level = permissions::effective_level(conn, user, &current.content_ref())?;
            Ok(match level {
                Some(level) => workflow::targets_from(current.status)
                    .filter(|rule| level.satisfies(rule.min_level))
                    .map(|rule| rule.to)
                    .collect(),
                None => vec![],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockPolicy;
    use crate::db::grants;
    use crate::permissions::{PermissionLevel, PermissionScope, UserContentPermission};
    use std::time::Duration;

    fn grant(db: &ContentDb, user: &str, level: PermissionLevel) {
        db.with_conn(|conn| {
            grants::insert_grant(
                conn,
                &UserContentPermission {
                    id: format!("g-{}", user),
                    user_id: UserId::new(user).unwrap(),
                    level,
                    scope: PermissionScope::Content("c1".into()),
                    granted_by: UserId::new("root").unwrap(),
                    granted_at: db::now(),
                },
            )
        })
        .unwrap();
    }

    fn seed(db: &ContentDb, status: WorkflowStatus) {
        let now = db::now();
        let author = UserId::new("author").unwrap();
        let metadata = ContentMetadata {
            id: "c1".into(),
            title: "Fractions".into(),
            description: None,
            key_stage: "KS2".into(),
            subject: "Mathematics".into(),
            region: "england".into(),
            topics: vec![],
            learning_objectives: vec![],
            difficulty: crate::models::DifficultyLevel::Beginner,
            content_type: "lesson".into(),
            content_format: "markdown".into(),
            estimated_duration_minutes: None,
            created_at: now,
            created_by: author.clone(),
            updated_at: now,
            updated_by: author,
            version: 1,
            status,
            prerequisites: vec![],
            related_content: vec![],
        };
        db.with_conn(|conn| content::insert_metadata(conn, &metadata, "v1")).unwrap();
    }

    fn service(db: Arc<ContentDb>) -> WorkflowService {
        let locks = Arc::new(KeyedLocks::new(LockPolicy::Queue, Duration::from_millis(500)));
        WorkflowService::new(db, locks, Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_editor_cannot_approve() {
        let db = Arc::new(ContentDb::open_in_memory().unwrap());
        seed(&db, WorkflowStatus::Review);
        grant(&db, "editor", PermissionLevel::Edit);
        let service = service(db);
        let editor = UserId::new("editor").unwrap();

        let err = service
            .transition("c1", WorkflowStatus::Approved, &editor, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CurriculumError::PermissionDenied { required: PermissionLevel::Approve, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_comment_checked_after_capability() {
        let db = Arc::new(ContentDb::open_in_memory().unwrap());
        seed(&db, WorkflowStatus::Review);
        grant(&db, "approver", PermissionLevel::Approve);
        let service = service(db);
        let approver = UserId::new("approver").unwrap();

        let err = service
            .transition("c1", WorkflowStatus::Rejected, &approver, Some("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, CurriculumError::MissingComment { .. }));

        let rejected = service
            .transition("c1", WorkflowStatus::Rejected, &approver, Some("incomplete"))
            .await
            .unwrap();
        assert_eq!(rejected.status, WorkflowStatus::Rejected);
        assert_eq!(rejected.version, 2);
    }

    #[test]
    fn test_allowed_transitions_follow_level() {
        let db = Arc::new(ContentDb::open_in_memory().unwrap());
        seed(&db, WorkflowStatus::Review);
        grant(&db, "approver", PermissionLevel::Approve);
        let service = service(db);

        let mut allowed = service
            .allowed_transitions("c1", &UserId::new("approver").unwrap())
            .unwrap();
        allowed.sort_by_key(|s| s.as_str());
        assert_eq!(
            allowed,
            vec![WorkflowStatus::Approved, WorkflowStatus::Draft, WorkflowStatus::Rejected]
        );
        assert!(service
            .allowed_transitions("c1", &UserId::new("stranger").unwrap())
            .unwrap()
            .is_empty());
    }
}
