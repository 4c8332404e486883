//! Permission service - grant administration and capability queries

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db::{self, content, grants, units, ContentDb};
use crate::error::CurriculumError;
use crate::identity::UserId;
use crate::permissions::{
    self, ContentRef, GrantRequest, PermissionLevel, PermissionScope, ResolvedPermission, Role,
    UserContentPermission,
};

use super::events::{CurriculumEvent, EventBus};

/// Grant storage and resolution
///
/// Granting and revoking need `admin` covering the grant's scope. A scope with
/// no administrator yet is seeded through [`PermissionService::bootstrap_admin`].
pub struct PermissionService {
    db: Arc<ContentDb>,
    events: Arc<EventBus>,
}

impl PermissionService {
    pub fn new(db: Arc<ContentDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Store a grant. Requests with zero or several scope fields are rejected.
    pub fn grant(&self, request: &GrantRequest, granted_by: &UserId) -> Result<UserContentPermission, CurriculumError> {
        let (user_id, level, scope) = request.validate()?;
        self.store(user_id, level, scope, granted_by, true)
    }

    /// Grant the level bundled by `role`
    pub fn grant_role(
        &self,
        user: &UserId,
        role: Role,
        scope: PermissionScope,
        granted_by: &UserId,
    ) -> Result<UserContentPermission, CurriculumError> {
        check_scope_value(&scope)?;
        self.store(user.clone(), role.level(), scope, granted_by, true)
    }

    /// Make `user` the first administrator of `scope`. Fails with `Conflict`
    /// once any admin grant exists at that exact scope.
    pub fn bootstrap_admin(&self, user: &UserId, scope: PermissionScope) -> Result<UserContentPermission, CurriculumError> {
        check_scope_value(&scope)?;
        self.store(user.clone(), PermissionLevel::Admin, scope, user, false)
    }

    fn store(
        &self,
        user_id: UserId,
        level: PermissionLevel,
        scope: PermissionScope,
        granted_by: &UserId,
        authorize: bool,
    ) -> Result<UserContentPermission, CurriculumError> {
        let grant = UserContentPermission {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            level,
            scope,
            granted_by: granted_by.clone(),
            granted_at: db::now(),
        };

        self.db.transaction(|tx| {
            if authorize {
                require_admin_over(tx, granted_by, &grant.scope)?;
            } else if grants::admin_exists_at(tx, &grant.scope)? {
                warn!(scope = %grant.scope, user = %grant.user_id, "Bootstrap refused, scope already administered");
                return Err(CurriculumError::Conflict(format!(
                    "{} already has an administrator",
                    grant.scope
                )));
            }
            grants::insert_grant(tx, &grant)
        })?;

        info!(
            user = %grant.user_id,
            level = %grant.level,
            scope = %grant.scope,
            by = %grant.granted_by,
            "Stored grant"
        );
        self.events.emit(CurriculumEvent::PermissionGranted {
            grant_id: grant.id.clone(),
            user_id: grant.user_id.to_string(),
            level: grant.level,
            scope: grant.scope.clone(),
        });

        Ok(grant)
    }

    /// Remove a grant; `revoked_by` needs `admin` covering its scope
    pub fn revoke(&self, grant_id: &str, revoked_by: &UserId) -> Result<(), CurriculumError> {
        self.db.transaction(|tx| {
            let grant = grants::get_grant(tx, grant_id)?
                .ok_or_else(|| CurriculumError::NotFound(format!("grant {}", grant_id)))?;
            require_admin_over(tx, revoked_by, &grant.scope)?;
            grants::delete_grant(tx, grant_id)
        })?;

        debug!(grant = %grant_id, by = %revoked_by, "Revoked grant");
        self.events.emit(CurriculumEvent::PermissionRevoked {
            grant_id: grant_id.to_string(),
        });
        Ok(())
    }

    pub fn grants_for_user(&self, user: &UserId) -> Result<Vec<UserContentPermission>, CurriculumError> {
        self.db.with_conn(|conn| grants::list_for_user(conn, user))
    }

    /// Pure read: does `user` hold at least `required` on `target`
    pub fn has_permission(
        &self,
        user: &UserId,
        target: &ContentRef,
        required: PermissionLevel,
    ) -> Result<bool, CurriculumError> {
        let user_grants = self.grants_for_user(user)?;
        Ok(permissions::has_permission(&user_grants, user, target, required))
    }

    /// Deciding grant for `user` on `target`
    pub fn resolve(&self, user: &UserId, target: &ContentRef) -> Result<Option<ResolvedPermission>, CurriculumError> {
        let user_grants = self.grants_for_user(user)?;
        Ok(permissions::resolve(&user_grants, user, target))
    }
}

fn check_scope_value(scope: &PermissionScope) -> Result<(), CurriculumError> {
    if scope.value().trim().is_empty() {
        return Err(CurriculumError::Validation("grant scope value is empty".into()));
    }
    Ok(())
}

/// What a grant at `scope` reaches. A content scope inherits the coordinates of
/// the stored item or unit; subject and key-stage scopes only match grants of
/// the same kind.
fn scope_target(conn: &Connection, scope: &PermissionScope) -> Result<ContentRef, CurriculumError> {
    Ok(match scope {
        PermissionScope::Content(id) => {
            if let Some(metadata) = content::get_metadata(conn, id)? {
                metadata.content_ref()
            } else if let Some(unit) = units::get_unit(conn, id)? {
                unit.content_ref()
            } else {
                ContentRef {
                    id: id.clone(),
                    subject: None,
                    key_stage: None,
                }
            }
        }
        PermissionScope::Subject(subject) => ContentRef {
            id: String::new(),
            subject: Some(subject.clone()),
            key_stage: None,
        },
        PermissionScope::KeyStage(key_stage) => ContentRef {
            id: String::new(),
            subject: None,
            key_stage: Some(key_stage.clone()),
        },
    })
}

fn require_admin_over(conn: &Connection, user: &UserId, scope: &PermissionScope) -> Result<(), CurriculumError> {
    let target = scope_target(conn, scope)?;
    match permissions::effective_level(conn, user, &target)? {
        Some(level) if level.satisfies(PermissionLevel::Admin) => Ok(()),
        _ => Err(CurriculumError::PermissionDenied {
            user: user.to_string(),
            target: scope.to_string(),
            required: PermissionLevel::Admin,
        }),
    }
}
