//! Content service - lifecycle of content items
//!
//! Wraps the content repository with validation, permission checks, per-key
//! locking, version accounting and event emission.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::{self, changes, content, variants, ContentDb};
use crate::db::changes::HistoryScope;
use crate::db::content::Counter;
use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::locks::{content_key, KeyedLocks};
use crate::models::{
    dedup, validate_id, ChangeType, ContentAnalytics, ContentChangeRecord, ContentMetadata,
    ContentPatch, ContentVariant, CreateContentInput, CurriculumContent, NewVariant,
};
use crate::permissions::{self, ContentRef, PermissionLevel};
use crate::workflow::WorkflowStatus;

use super::events::{CurriculumEvent, EventBus};

/// Content service for lifecycle operations
pub struct ContentService {
    db: Arc<ContentDb>,
    locks: Arc<KeyedLocks>,
    events: Arc<EventBus>,
}

impl ContentService {
    /// Create a new content service
    pub fn new(db: Arc<ContentDb>, locks: Arc<KeyedLocks>, events: Arc<EventBus>) -> Self {
        Self { db, locks, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get the full aggregate
    pub fn get(&self, id: &str) -> Result<CurriculumContent, CurriculumError> {
        self.db.with_conn(|conn| content::require_content(conn, id))
    }

    pub fn get_metadata(&self, id: &str) -> Result<ContentMetadata, CurriculumError> {
        self.db.with_conn(|conn| content::require_metadata(conn, id))
    }

    /// Every change record for a content item, metadata and variants, oldest first.
    /// Records outlive the item, so this also answers for deleted content.
    pub fn history(&self, id: &str) -> Result<Vec<ContentChangeRecord>, CurriculumError> {
        self.db.with_conn(|conn| changes::list_for_content(conn, id, HistoryScope::All))
    }

    /// Metadata-level records only
    pub fn metadata_history(&self, id: &str) -> Result<Vec<ContentChangeRecord>, CurriculumError> {
        self.db.with_conn(|conn| changes::list_for_content(conn, id, HistoryScope::Metadata))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a content item in `draft` with its initial (default) variant
    pub async fn create(
        &self,
        input: CreateContentInput,
        initial_variant: NewVariant,
        user: &UserId,
    ) -> Result<CurriculumContent, CurriculumError> {
        input.validate()?;
        initial_variant.validate()?;

        let id = input
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let target = ContentRef::new(&id, &input.subject, &input.key_stage);

        let _guard = self.locks.acquire(&content_key(&id)).await?;

        let now = db::now();
        let metadata = ContentMetadata {
            id: id.clone(),
            title: input.title,
            description: input.description,
            key_stage: input.key_stage,
            subject: input.subject,
            region: input.region,
            topics: dedup(&input.topics),
            learning_objectives: input.learning_objectives,
            difficulty: input.difficulty,
            content_type: input.content_type,
            content_format: input.content_format,
            estimated_duration_minutes: input.estimated_duration_minutes,
            created_at: now,
            created_by: user.clone(),
            updated_at: now,
            updated_by: user.clone(),
            version: 1,
            status: WorkflowStatus::initial(),
            prerequisites: dedup(&input.prerequisites),
            related_content: dedup(&input.related_content),
        };
        let variant = ContentVariant {
            id: uuid::Uuid::new_v4().to_string(),
            content_id: id.clone(),
            learning_style: initial_variant.learning_style,
            body: initial_variant.body,
            media_refs: initial_variant.media_refs,
            interactive: initial_variant.interactive,
            created_at: now,
            created_by: user.clone(),
            updated_at: now,
            updated_by: user.clone(),
            version: 1,
        };

        let created = self.db.transaction(|tx| {
            permissions::require(tx, user, &target, PermissionLevel::Edit)?;
            // Versions never restart for an id, so a deleted id stays retired
            if let Some(last) = changes::last_version(tx, &id)? {
                return Err(CurriculumError::Conflict(format!(
                    "content id {} already has history up to version {}",
                    id, last
                )));
            }
            content::insert_metadata(tx, &metadata, &variant.id)?;
            variants::insert_variant(tx, &variant)?;
            changes::append(
                tx,
                &ContentChangeRecord::new(
                    &id,
                    None,
                    user,
                    now,
                    0,
                    ChangeType::Create,
                    format!("Created '{}'", metadata.title),
                ),
            )?;
            content::require_content(tx, &id)
        })?;

        info!(id = %id, by = %user, style = %variant.learning_style, "Created content");
        self.events.emit(CurriculumEvent::ContentCreated {
            id: id.clone(),
            title: created.metadata.title.clone(),
            by: user.to_string(),
        });

        Ok(created)
    }

    /// Merge `patch` into the metadata, bumping the version by one
    pub async fn update(
        &self,
        id: &str,
        patch: ContentPatch,
        user: &UserId,
    ) -> Result<ContentMetadata, CurriculumError> {
        patch.validate(id)?;

        let _guard = self.locks.acquire(&content_key(id)).await?;
        let now = db::now();
        let fields = patch.changed_fields();

        let updated = self.db.transaction(|tx| {
            let current = content::require_metadata(tx, id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Edit)?;

            if let Some(expected) = patch.expected_version {
                if expected != current.version {
                    warn!(id = %id, expected, actual = current.version, "Stale update rejected");
                    return Err(CurriculumError::Conflict(format!(
                        "content {} is at version {}, not {}",
                        id, current.version, expected
                    )));
                }
            }

            let mut next = current.clone();
            patch.apply_to(&mut next);

            // Moving an item to new coordinates needs edit there too
            if next.subject != current.subject || next.key_stage != current.key_stage {
                permissions::require(tx, user, &next.content_ref(), PermissionLevel::Edit)?;
            }

            next.version = current.version + 1;
            next.updated_at = now;
            next.updated_by = user.clone();

            content::update_metadata(tx, &next, current.version)?;
            changes::append(
                tx,
                &ContentChangeRecord::new(
                    id,
                    None,
                    user,
                    now,
                    current.version,
                    ChangeType::Update,
                    format!("Updated {}", fields.join(", ")),
                ),
            )?;
            Ok(next)
        })?;

        debug!(id = %id, version = updated.version, fields = ?fields, "Updated content");
        self.events.emit(CurriculumEvent::ContentUpdated {
            id: id.to_string(),
            version: updated.version,
            fields,
        });

        Ok(updated)
    }

    /// Hard delete. Only `draft` or `archived` items may be deleted; the ledger
    /// keeps its records and gains a final `delete` record.
    pub async fn delete(&self, id: &str, user: &UserId) -> Result<(), CurriculumError> {
        let key = content_key(id);
        let guard = self.locks.acquire(&key).await?;
        let now = db::now();

        self.db.transaction(|tx| {
            let current = content::require_metadata(tx, id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Admin)?;

            if !current.status.is_deletable() {
                return Err(CurriculumError::InvalidState(format!(
                    "content {} is {}; only draft or archived content can be deleted",
                    id, current.status
                )));
            }

            content::delete_content(tx, id)?;
            changes::append(
                tx,
                &ContentChangeRecord::new(
                    id,
                    None,
                    user,
                    now,
                    current.version,
                    ChangeType::Delete,
                    format!("Deleted '{}'", current.title),
                ),
            )
        })?;

        drop(guard);

        info!(id = %id, by = %user, "Deleted content");
        self.events.emit(CurriculumEvent::ContentDeleted {
            id: id.to_string(),
            by: user.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Assessments & analytics
    // =========================================================================

    /// Link an assessment to the item. Idempotent; returns false if already linked.
    pub async fn link_assessment(
        &self,
        id: &str,
        assessment_id: &str,
        user: &UserId,
    ) -> Result<bool, CurriculumError> {
        validate_id("assessmentId", assessment_id)?;
        let _guard = self.locks.acquire(&content_key(id)).await?;
        let now = db::now();

        let linked = self.db.transaction(|tx| {
            let current = content::require_metadata(tx, id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Edit)?;
            content::link_assessment(tx, id, assessment_id, user, &now)
        })?;

        debug!(id = %id, assessment = %assessment_id, linked, "Linked assessment");
        Ok(linked)
    }

    pub fn record_view(&self, id: &str) -> Result<(), CurriculumError> {
        self.bump(id, Counter::View)
    }

    pub fn record_completion(&self, id: &str) -> Result<(), CurriculumError> {
        self.bump(id, Counter::Completion)
    }

    fn bump(&self, id: &str, counter: Counter) -> Result<(), CurriculumError> {
        let found = self.db.with_conn(|conn| content::increment(conn, id, counter))?;
        if !found {
            return Err(CurriculumError::NotFound(format!("content {}", id)));
        }
        Ok(())
    }

    /// Record a learner rating from 1 to 5
    pub fn record_rating(&self, id: &str, rating: u8) -> Result<(), CurriculumError> {
        if !(1..=5).contains(&rating) {
            return Err(CurriculumError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        let found = self.db.with_conn(|conn| content::add_rating(conn, id, rating))?;
        if !found {
            return Err(CurriculumError::NotFound(format!("content {}", id)));
        }
        Ok(())
    }

    pub fn analytics(&self, id: &str) -> Result<ContentAnalytics, CurriculumError> {
        self.db
            .with_conn(|conn| content::get_analytics(conn, id))?
            .ok_or_else(|| CurriculumError::NotFound(format!("content {}", id)))
    }
}
