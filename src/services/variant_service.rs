//! Variant service - learning-style fan-out of a content item
//!
//! Adaptation reads the default variant's body as source and asks the injected
//! [`VariantGenerator`] for the target style's body. The generator is awaited
//! while the item's lock is held; the write that follows is a version
//! compare-and-swap on the variant row.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adaptation::VariantGenerator;
use crate::db::{self, changes, content, variants, ContentDb};
use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::locks::{content_key, KeyedLocks};
use crate::models::{ChangeType, ContentChangeRecord, ContentMetadata, ContentVariant, LearningStyle};
use crate::permissions::{self, PermissionLevel};

use super::events::{CurriculumEvent, EventBus};

/// Result of adapting one style in a batch
#[derive(Debug)]
pub struct AdaptOutcome {
    pub style: LearningStyle,
    pub result: Result<ContentVariant, CurriculumError>,
}

impl AdaptOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct VariantService {
    db: Arc<ContentDb>,
    locks: Arc<KeyedLocks>,
    events: Arc<EventBus>,
}

impl VariantService {
    pub fn new(db: Arc<ContentDb>, locks: Arc<KeyedLocks>, events: Arc<EventBus>) -> Self {
        Self { db, locks, events }
    }

    /// Ledger records of the `style` variant, oldest first
    pub fn history(
        &self,
        content_id: &str,
        style: LearningStyle,
    ) -> Result<Vec<ContentChangeRecord>, CurriculumError> {
        self.db.with_conn(|conn| {
            let variant = require_variant(conn, content_id, style)?;
            changes::list_for_variant(conn, &variant.id)
        })
    }

    /// Generate (or regenerate) the variant for `style`
    pub async fn adapt(
        &self,
        content_id: &str,
        style: LearningStyle,
        generator: &dyn VariantGenerator,
        user: &UserId,
    ) -> Result<ContentVariant, CurriculumError> {
        let _guard = self.locks.acquire(&content_key(content_id)).await?;
        self.adapt_locked(content_id, style, generator, user).await
    }

    /// Adapt each distinct style independently under one lock acquisition.
    /// A failed style does not undo the ones before it.
    pub async fn adapt_batch(
        &self,
        content_id: &str,
        styles: &[LearningStyle],
        generator: &dyn VariantGenerator,
        user: &UserId,
    ) -> Result<Vec<AdaptOutcome>, CurriculumError> {
        let _guard = self.locks.acquire(&content_key(content_id)).await?;

        // Unknown item or missing capability fails the whole batch
        self.db.with_conn(|conn| {
            let metadata = content::require_metadata(conn, content_id)?;
            permissions::require(conn, user, &metadata.content_ref(), PermissionLevel::Edit)
        })?;

        let mut seen = HashSet::new();
        let mut outcomes = Vec::new();
        for &style in styles {
            if !seen.insert(style) {
                continue;
            }
            let result = self.adapt_locked(content_id, style, generator, user).await;
            if let Err(ref e) = result {
                warn!(id = %content_id, style = %style, error = %e, "Adaptation failed");
            }
            outcomes.push(AdaptOutcome { style, result });
        }

        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        info!(id = %content_id, requested = outcomes.len(), succeeded, "Batch adaptation finished");
        Ok(outcomes)
    }

    async fn adapt_locked(
        &self,
        content_id: &str,
        style: LearningStyle,
        generator: &dyn VariantGenerator,
        user: &UserId,
    ) -> Result<ContentVariant, CurriculumError> {
        let (source, prior) = self.db.with_conn(|conn| {
            let metadata = content::require_metadata(conn, content_id)?;
            permissions::require(conn, user, &metadata.content_ref(), PermissionLevel::Edit)?;
            let source = default_variant(conn, content_id)?;
            let prior = variants::get_variant_by_style(conn, content_id, style)?;
            Ok((source.body, prior))
        })?;

        if source.trim().is_empty() {
            return Err(CurriculumError::Validation(format!(
                "content {} has an empty default variant body",
                content_id
            )));
        }

        debug!(id = %content_id, style = %style, regenerate = prior.is_some(), "Generating variant");
        let body = generator
            .generate(style, prior.as_ref().map(|v| v.body.as_str()), &source)
            .await
            .map_err(|e| CurriculumError::GenerationFailed(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(CurriculumError::GenerationFailed(format!(
                "{} generation returned an empty body",
                style
            )));
        }

        let now = db::now();
        let variant = self.db.transaction(|tx| match prior {
            Some(ref prior) => {
                let mut next = prior.clone();
                next.body = body.clone();
                next.version = prior.version + 1;
                next.updated_at = now;
                next.updated_by = user.clone();

                variants::update_variant(tx, &next, prior.version)?;
                changes::append(
                    tx,
                    &ContentChangeRecord::new(
                        content_id,
                        Some(&next.id),
                        user,
                        now,
                        prior.version,
                        ChangeType::Update,
                        format!("Regenerated {} variant", style),
                    ),
                )?;
                Ok(next)
            }
            None => {
                let created = ContentVariant {
                    id: uuid::Uuid::new_v4().to_string(),
                    content_id: content_id.to_string(),
                    learning_style: style,
                    body: body.clone(),
                    media_refs: vec![],
                    interactive: None,
                    created_at: now,
                    created_by: user.clone(),
                    updated_at: now,
                    updated_by: user.clone(),
                    version: 1,
                };

                variants::insert_variant(tx, &created)?;
                changes::append(
                    tx,
                    &ContentChangeRecord::new(
                        content_id,
                        Some(&created.id),
                        user,
                        now,
                        0,
                        ChangeType::Create,
                        format!("Generated {} variant", style),
                    ),
                )?;
                Ok(created)
            }
        })?;

        self.events.emit(CurriculumEvent::VariantAdapted {
            content_id: content_id.to_string(),
            variant_id: variant.id.clone(),
            style,
            version: variant.version,
        });
        Ok(variant)
    }

    /// Point the default at the variant for `style`. Bumps the metadata version
    /// unless that variant already is the default.
    pub async fn set_default_variant(
        &self,
        content_id: &str,
        style: LearningStyle,
        user: &UserId,
    ) -> Result<ContentMetadata, CurriculumError> {
        let _guard = self.locks.acquire(&content_key(content_id)).await?;
        let now = db::now();

        let (metadata, changed_to) = self.db.transaction(|tx| {
            let current = content::require_metadata(tx, content_id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Edit)?;

            let variant = require_variant(tx, content_id, style)?;
            if content::get_default_variant_id(tx, content_id)?.as_deref() == Some(variant.id.as_str()) {
                return Ok((current, None));
            }

            let next = repoint_default(tx, &current, &variant, user, now)?;
            Ok((next, Some(variant.id)))
        })?;

        if let Some(variant_id) = changed_to {
            debug!(id = %content_id, style = %style, "Default variant changed");
            self.events.emit(CurriculumEvent::DefaultVariantChanged {
                content_id: content_id.to_string(),
                variant_id,
            });
        }
        Ok(metadata)
    }

    /// Remove the variant for `style`.
    ///
    /// Removing the default variant needs `replacement_default`, which becomes the
    /// new default in the same transaction. The replacement is ignored when the
    /// removed variant is not the default.
    pub async fn remove_variant(
        &self,
        content_id: &str,
        style: LearningStyle,
        replacement_default: Option<LearningStyle>,
        user: &UserId,
    ) -> Result<(), CurriculumError> {
        let _guard = self.locks.acquire(&content_key(content_id)).await?;
        let now = db::now();

        let new_default = self.db.transaction(|tx| {
            let current = content::require_metadata(tx, content_id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Edit)?;

            let variant = require_variant(tx, content_id, style)?;
            let is_default =
                content::get_default_variant_id(tx, content_id)?.as_deref() == Some(variant.id.as_str());

            let mut new_default = None;
            if is_default {
                let replacement = match replacement_default {
                    None => {
                        return Err(CurriculumError::InvalidState(format!(
                            "{} is the default variant of {}; supply a replacement default",
                            style, content_id
                        )))
                    }
                    Some(r) if r == style => {
                        return Err(CurriculumError::Validation(
                            "replacement default must differ from the removed variant".into(),
                        ))
                    }
                    Some(r) => require_variant(tx, content_id, r)?,
                };
                repoint_default(tx, &current, &replacement, user, now)?;
                new_default = Some(replacement.id);
            }

            variants::delete_variant(tx, &variant.id)?;
            changes::append(
                tx,
                &ContentChangeRecord::new(
                    content_id,
                    Some(&variant.id),
                    user,
                    now,
                    variant.version,
                    ChangeType::Delete,
                    format!("Removed {} variant", style),
                ),
            )?;
            Ok(new_default)
        })?;

        info!(id = %content_id, style = %style, "Removed variant");
        if let Some(variant_id) = new_default {
            self.events.emit(CurriculumEvent::DefaultVariantChanged {
                content_id: content_id.to_string(),
                variant_id,
            });
        }
        self.events.emit(CurriculumEvent::VariantRemoved {
            content_id: content_id.to_string(),
            style,
        });
        Ok(())
    }
}

fn default_variant(conn: &rusqlite::Connection, content_id: &str) -> Result<ContentVariant, CurriculumError> {
    let default_id = content::get_default_variant_id(conn, content_id)?
        .ok_or_else(|| CurriculumError::NotFound(format!("content {}", content_id)))?;
    variants::get_variant(conn, &default_id)?.ok_or_else(|| {
        CurriculumError::Internal(format!(
            "content {} points at missing default variant {}",
            content_id, default_id
        ))
    })
}

fn require_variant(
    conn: &rusqlite::Connection,
    content_id: &str,
    style: LearningStyle,
) -> Result<ContentVariant, CurriculumError> {
    variants::get_variant_by_style(conn, content_id, style)?
        .ok_or_else(|| CurriculumError::NotFound(format!("{} variant of content {}", style, content_id)))
}

/// Move the default pointer and account for it as a metadata update
fn repoint_default(
    conn: &rusqlite::Connection,
    current: &ContentMetadata,
    variant: &ContentVariant,
    user: &UserId,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<ContentMetadata, CurriculumError> {
    let mut next = current.clone();
    next.version = current.version + 1;
    next.updated_at = now;
    next.updated_by = user.clone();

    content::update_metadata(conn, &next, current.version)?;
    content::set_default_variant_id(conn, &current.id, &variant.id)?;
    changes::append(
        conn,
        &ContentChangeRecord::new(
            &current.id,
            None,
            user,
            now,
            current.version,
            ChangeType::Update,
            format!("Default variant set to {}", variant.learning_style),
        ),
    )?;
    Ok(next)
}
