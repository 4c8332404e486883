//! Unit service - ordered composition of content items
//!
//! A unit's `content_ids` order is the consumption order. It changes only
//! through [`UnitService::reorder`], [`UnitService::add_content`] and
//! [`UnitService::remove_content`]. Unit status follows the same transition
//! table as content but never cascades to members; members that are missing
//! or unpublished surface as [`IntegrityWarning`]s.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{self, content, units, ContentDb};
use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::locks::{unit_key, KeyedLocks};
use crate::models::{dedup, has_duplicates, validate_id, CreateUnitInput, CurriculumUnit};
use crate::permissions::{self, ContentRef, PermissionLevel};
use crate::workflow::{self, WorkflowStatus};

use super::events::{CurriculumEvent, EventBus};

/// Non-fatal problem with a unit's members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityWarning {
    /// Member id no longer resolves to content
    #[serde(rename_all = "camelCase")]
    MissingContent { content_id: String },
    /// Published unit references content that is not published
    #[serde(rename_all = "camelCase")]
    UnpublishedContent {
        content_id: String,
        status: WorkflowStatus,
    },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::MissingContent { content_id } => {
                write!(f, "content {} does not exist", content_id)
            }
            IntegrityWarning::UnpublishedContent { content_id, status } => {
                write!(f, "content {} is {}, not published", content_id, status)
            }
        }
    }
}

/// A unit after a status change, with the warnings that apply to it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTransitionOutcome {
    pub unit: CurriculumUnit,
    pub warnings: Vec<IntegrityWarning>,
}

pub struct UnitService {
    db: Arc<ContentDb>,
    locks: Arc<KeyedLocks>,
    events: Arc<EventBus>,
}

impl UnitService {
    pub fn new(db: Arc<ContentDb>, locks: Arc<KeyedLocks>, events: Arc<EventBus>) -> Self {
        Self { db, locks, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_unit(&self, id: &str) -> Result<CurriculumUnit, CurriculumError> {
        self.db.with_conn(|conn| units::require_unit(conn, id))
    }

    pub fn list_units(&self, limit: u32, offset: u32) -> Result<Vec<CurriculumUnit>, CurriculumError> {
        self.db.with_conn(|conn| units::list_units(conn, limit, offset))
    }

    /// Member problems for the unit in its current state
    pub fn integrity_warnings(&self, id: &str) -> Result<Vec<IntegrityWarning>, CurriculumError> {
        self.db.with_conn(|conn| {
            let unit = units::require_unit(conn, id)?;
            integrity_warnings(conn, &unit)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub async fn create_unit(&self, input: CreateUnitInput, user: &UserId) -> Result<CurriculumUnit, CurriculumError> {
        input.validate()?;

        let id = input
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let target = ContentRef::new(&id, &input.subject, &input.key_stage);

        let _guard = self.locks.acquire(&unit_key(&id)).await?;
        let now = db::now();

        let unit = self.db.transaction(|tx| {
            permissions::require(tx, user, &target, PermissionLevel::Edit)?;
            require_members_exist(tx, &input.content_ids)?;
            validate_prerequisites(tx, &id, &input.prerequisite_unit_ids)?;

            let unit = CurriculumUnit {
                id: id.clone(),
                title: input.title.clone(),
                description: input.description.clone(),
                subject: input.subject.clone(),
                key_stage: input.key_stage.clone(),
                content_ids: input.content_ids.clone(),
                learning_objectives: input.learning_objectives.clone(),
                prerequisite_unit_ids: input.prerequisite_unit_ids.clone(),
                created_at: now,
                created_by: user.clone(),
                updated_at: now,
                updated_by: user.clone(),
                version: 1,
                status: WorkflowStatus::initial(),
            };
            units::insert_unit(tx, &unit)?;
            Ok(unit)
        })?;

        info!(id = %unit.id, members = unit.content_ids.len(), "Created unit");
        self.events.emit(CurriculumEvent::UnitCreated {
            id: unit.id.clone(),
            title: unit.title.clone(),
        });
        Ok(unit)
    }

    /// Replace the member order with `ordering`, which must be a permutation of
    /// the current members
    pub async fn reorder(
        &self,
        unit_id: &str,
        ordering: &[String],
        user: &UserId,
    ) -> Result<CurriculumUnit, CurriculumError> {
        let unit = self
            .mutate(unit_id, user, PermissionLevel::Edit, |_, unit| {
                check_permutation(&unit.content_ids, ordering)?;
                unit.content_ids = ordering.to_vec();
                Ok(())
            })
            .await?;

        self.events.emit(CurriculumEvent::UnitReordered {
            id: unit.id.clone(),
            version: unit.version,
        });
        Ok(unit)
    }

    /// Append a content item at the tail
    pub async fn add_content(
        &self,
        unit_id: &str,
        content_id: &str,
        user: &UserId,
    ) -> Result<CurriculumUnit, CurriculumError> {
        validate_id("contentId", content_id)?;
        let unit = self
            .mutate(unit_id, user, PermissionLevel::Edit, |conn, unit| {
                if unit.content_ids.iter().any(|c| c == content_id) {
                    return Err(CurriculumError::Validation(format!(
                        "content {} is already in unit {}",
                        content_id, unit.id
                    )));
                }
                require_members_exist(conn, &[content_id.to_string()])?;
                unit.content_ids.push(content_id.to_string());
                Ok(())
            })
            .await?;

        self.emit_updated(&unit);
        Ok(unit)
    }

    /// Remove one member, keeping the order of the rest
    pub async fn remove_content(
        &self,
        unit_id: &str,
        content_id: &str,
        user: &UserId,
    ) -> Result<CurriculumUnit, CurriculumError> {
        let unit = self
            .mutate(unit_id, user, PermissionLevel::Edit, |_, unit| {
                let position = unit
                    .content_ids
                    .iter()
                    .position(|c| c == content_id)
                    .ok_or_else(|| {
                        CurriculumError::NotFound(format!("content {} in unit {}", content_id, unit.id))
                    })?;
                unit.content_ids.remove(position);
                Ok(())
            })
            .await?;

        self.emit_updated(&unit);
        Ok(unit)
    }

    pub async fn set_prerequisites(
        &self,
        unit_id: &str,
        prerequisites: &[String],
        user: &UserId,
    ) -> Result<CurriculumUnit, CurriculumError> {
        let unit = self
            .mutate(unit_id, user, PermissionLevel::Edit, |conn, unit| {
                validate_prerequisites(conn, &unit.id, prerequisites)?;
                unit.prerequisite_unit_ids = prerequisites.to_vec();
                Ok(())
            })
            .await?;

        self.emit_updated(&unit);
        Ok(unit)
    }

    /// Move the unit through the workflow table. Member content is untouched.
    pub async fn transition_unit(
        &self,
        unit_id: &str,
        to: WorkflowStatus,
        user: &UserId,
        comment: Option<&str>,
    ) -> Result<UnitTransitionOutcome, CurriculumError> {
        let _guard = self.locks.acquire(&unit_key(unit_id)).await?;
        let now = db::now();

        let (from, outcome) = self.db.transaction(|tx| {
            let current = units::require_unit(tx, unit_id)?;
            let target = current.content_ref();
            let level = permissions::effective_level(tx, user, &target)?;
            workflow::check(current.status, to, level, comment, user.as_str(), &target.to_string())?;

            let mut next = current.clone();
            next.status = to;
            next.version = current.version + 1;
            next.updated_at = now;
            next.updated_by = user.clone();
            units::update_unit(tx, &next, current.version)?;

            let warnings = integrity_warnings(tx, &next)?;
            Ok((current.status, UnitTransitionOutcome { unit: next, warnings }))
        })?;

        for warning in &outcome.warnings {
            warn!(unit = %unit_id, "{}", warning);
        }
        info!(id = %unit_id, from = %from, to = %to, by = %user, "Unit status changed");
        self.events.emit(CurriculumEvent::UnitStatusChanged {
            id: unit_id.to_string(),
            from,
            to,
            warnings: outcome.warnings.len(),
        });
        Ok(outcome)
    }

    /// Delete a unit; admin only, and only in `draft` or `archived`
    pub async fn delete_unit(&self, unit_id: &str, user: &UserId) -> Result<(), CurriculumError> {
        let key = unit_key(unit_id);
        let guard = self.locks.acquire(&key).await?;

        self.db.transaction(|tx| {
            let current = units::require_unit(tx, unit_id)?;
            permissions::require(tx, user, &current.content_ref(), PermissionLevel::Admin)?;
            if !current.status.is_deletable() {
                return Err(CurriculumError::InvalidState(format!(
                    "unit {} is {}; only draft or archived units can be deleted",
                    unit_id, current.status
                )));
            }
            units::delete_unit(tx, unit_id)?;
            Ok(())
        })?;

        drop(guard);

        info!(id = %unit_id, by = %user, "Deleted unit");
        self.events.emit(CurriculumEvent::UnitDeleted {
            id: unit_id.to_string(),
        });
        Ok(())
    }

    /// Load, check, edit and store a unit under its lock, bumping the version
    async fn mutate<F>(
        &self,
        unit_id: &str,
        user: &UserId,
        required: PermissionLevel,
        edit: F,
    ) -> Result<CurriculumUnit, CurriculumError>
    where
        F: FnOnce(&Connection, &mut CurriculumUnit) -> Result<(), CurriculumError>,
    {
        let _guard = self.locks.acquire(&unit_key(unit_id)).await?;
        let now = db::now();

        self.db.transaction(|tx| {
            let conn: &Connection = tx;
            let current = units::require_unit(conn, unit_id)?;
            permissions::require(conn, user, &current.content_ref(), required)?;

            let mut next = current.clone();
            edit(conn, &mut next)?;
            next.version = current.version + 1;
            next.updated_at = now;
            next.updated_by = user.clone();

            units::update_unit(conn, &next, current.version)?;
            debug!(id = %unit_id, version = next.version, "Updated unit");
            Ok(next)
        })
    }

    fn emit_updated(&self, unit: &CurriculumUnit) {
        self.events.emit(CurriculumEvent::UnitUpdated {
            id: unit.id.clone(),
            version: unit.version,
        });
    }
}

fn check_permutation(current: &[String], ordering: &[String]) -> Result<(), CurriculumError> {
    if has_duplicates(ordering) {
        return Err(CurriculumError::InvalidOrdering("ordering contains duplicates".into()));
    }
    if ordering.len() != current.len() {
        return Err(CurriculumError::InvalidOrdering(format!(
            "ordering has {} items, unit has {}",
            ordering.len(),
            current.len()
        )));
    }
    let members: HashSet<&str> = current.iter().map(String::as_str).collect();
    if let Some(stranger) = ordering.iter().find(|id| !members.contains(id.as_str())) {
        return Err(CurriculumError::InvalidOrdering(format!(
            "{} is not a member of the unit",
            stranger
        )));
    }
    Ok(())
}

fn require_members_exist(conn: &Connection, ids: &[String]) -> Result<(), CurriculumError> {
    let existing: HashSet<String> = content::check_content_exists(conn, ids)?.into_iter().collect();
    let missing: Vec<&str> = ids
        .iter()
        .filter(|id| !existing.contains(*id))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(CurriculumError::NotFound(format!("content {}", missing.join(", "))));
    }
    Ok(())
}

fn validate_prerequisites(conn: &Connection, unit_id: &str, prerequisites: &[String]) -> Result<(), CurriculumError> {
    if has_duplicates(prerequisites) {
        return Err(CurriculumError::Validation("prerequisites must be unique".into()));
    }
    if prerequisites.iter().any(|p| p == unit_id) {
        return Err(CurriculumError::Validation("a unit cannot be its own prerequisite".into()));
    }

    let existing: HashSet<String> = units::existing_unit_ids(conn, prerequisites)?.into_iter().collect();
    let missing: Vec<String> = prerequisites
        .iter()
        .filter(|p| !existing.contains(*p))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(CurriculumError::NotFound(format!("unit {}", missing.join(", "))));
    }

    if reaches(conn, prerequisites, unit_id)? {
        return Err(CurriculumError::Validation(format!(
            "prerequisites of {} would form a cycle",
            unit_id
        )));
    }
    Ok(())
}

/// Whether `target` is reachable from `start` along prerequisite edges
fn reaches(conn: &Connection, start: &[String], target: &str) -> Result<bool, CurriculumError> {
    let mut stack = dedup(start);
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == target {
            return Ok(true);
        }
        if seen.insert(id.clone()) {
            stack.extend(units::prerequisites_of(conn, &id)?);
        }
    }
    Ok(false)
}

fn integrity_warnings(conn: &Connection, unit: &CurriculumUnit) -> Result<Vec<IntegrityWarning>, CurriculumError> {
    let statuses = content::get_statuses(conn, &unit.content_ids)?;
    let mut warnings = Vec::new();

    for content_id in &unit.content_ids {
        match statuses.iter().find(|(id, _)| id == content_id) {
            None => warnings.push(IntegrityWarning::MissingContent {
                content_id: content_id.clone(),
            }),
            Some((_, status)) if unit.status == WorkflowStatus::Published && *status != WorkflowStatus::Published => {
                warnings.push(IntegrityWarning::UnpublishedContent {
                    content_id: content_id.clone(),
                    status: *status,
                })
            }
            Some(_) => {}
        }
    }
    Ok(warnings)
}
