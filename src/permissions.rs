//! Permission model
//!
//! Capability levels form a total order, `view < comment < edit < approve < admin`,
//! each level implying everything below it. Roles are fixed bundles that map 1:1
//! onto levels.
//!
//! A grant binds one user to one level at exactly one scope:
//!
//! | Scope | Matches | Specificity |
//! |-------|---------|-------------|
//! | content | one content item (or unit) id | 3 |
//! | subject | every item with that subject | 2 |
//! | key-stage | every item in that key stage | 1 |
//!
//! ## Resolution
//!
//! The effective level for a (user, target) pair is the highest level among the
//! user's matching grants. When several matching grants share that level, the
//! most specific one is the deciding grant. A narrow low grant therefore never
//! hides a broad high grant, and no matching grant means no access.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::grants;
use crate::error::CurriculumError;
use crate::identity::UserId;

/// Capability level, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    Comment,
    Edit,
    Approve,
    Admin,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 5] = [
        PermissionLevel::View,
        PermissionLevel::Comment,
        PermissionLevel::Edit,
        PermissionLevel::Approve,
        PermissionLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::View => "view",
            PermissionLevel::Comment => "comment",
            PermissionLevel::Edit => "edit",
            PermissionLevel::Approve => "approve",
            PermissionLevel::Admin => "admin",
        }
    }

    /// True when this level includes `required`
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| CurriculumError::Validation(format!("unknown permission level '{}'", s)))
    }
}

/// Named role; sugar for granting the matching level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Commenter,
    Editor,
    Approver,
    Admin,
}

impl Role {
    pub fn level(&self) -> PermissionLevel {
        match self {
            Role::Viewer => PermissionLevel::View,
            Role::Commenter => PermissionLevel::Comment,
            Role::Editor => PermissionLevel::Edit,
            Role::Approver => PermissionLevel::Approve,
            Role::Admin => PermissionLevel::Admin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Commenter => "commenter",
            Role::Editor => "editor",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "commenter" => Ok(Role::Commenter),
            "editor" => Ok(Role::Editor),
            "approver" => Ok(Role::Approver),
            "admin" => Ok(Role::Admin),
            other => Err(CurriculumError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Breadth at which a grant applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum PermissionScope {
    Content(String),
    Subject(String),
    KeyStage(String),
}

impl PermissionScope {
    /// Build a scope from the three optional scope fields of a grant record.
    /// Exactly one must be set.
    pub fn from_fields(
        content_id: Option<&str>,
        subject: Option<&str>,
        key_stage: Option<&str>,
    ) -> Result<Self, CurriculumError> {
        let mut set: Vec<PermissionScope> = [
            content_id.map(|v| PermissionScope::Content(v.to_string())),
            subject.map(|v| PermissionScope::Subject(v.to_string())),
            key_stage.map(|v| PermissionScope::KeyStage(v.to_string())),
        ]
        .into_iter()
        .flatten()
        .collect();

        if set.len() > 1 {
            return Err(CurriculumError::Validation(format!(
                "grant must set exactly one of contentId, subject, keyStage ({} set)",
                set.len()
            )));
        }
        match set.pop() {
            Some(scope) if scope.value().trim().is_empty() => {
                Err(CurriculumError::Validation("grant scope value is empty".into()))
            }
            Some(scope) => Ok(scope),
            None => Err(CurriculumError::Validation(
                "grant must set exactly one of contentId, subject, keyStage (none set)".into(),
            )),
        }
    }

    /// Higher is narrower
    pub fn specificity(&self) -> u8 {
        match self {
            PermissionScope::Content(_) => 3,
            PermissionScope::Subject(_) => 2,
            PermissionScope::KeyStage(_) => 1,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            PermissionScope::Content(v) | PermissionScope::Subject(v) | PermissionScope::KeyStage(v) => v,
        }
    }

    pub fn matches(&self, target: &ContentRef) -> bool {
        match self {
            PermissionScope::Content(id) => *id == target.id,
            PermissionScope::Subject(subject) => target.subject.as_deref() == Some(subject.as_str()),
            PermissionScope::KeyStage(ks) => target.key_stage.as_deref() == Some(ks.as_str()),
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Content(v) => write!(f, "content:{}", v),
            PermissionScope::Subject(v) => write!(f, "subject:{}", v),
            PermissionScope::KeyStage(v) => write!(f, "keyStage:{}", v),
        }
    }
}

/// Coordinates of the thing being accessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub id: String,
    pub subject: Option<String>,
    pub key_stage: Option<String>,
}

impl ContentRef {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, key_stage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: Some(subject.into()),
            key_stage: Some(key_stage.into()),
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content:{}", self.id)
    }
}

/// Input for a new grant, mirroring the stored record's three scope fields
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: String,
    pub level: Option<PermissionLevel>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub key_stage: Option<String>,
}

impl GrantRequest {
    /// Resolve the request into (user, level, scope), rejecting malformed grants
    pub fn validate(&self) -> Result<(UserId, PermissionLevel, PermissionScope), CurriculumError> {
        let user = UserId::new(self.user_id.clone())?;
        let level = match (self.level, self.role) {
            (Some(level), None) => level,
            (None, Some(role)) => role.level(),
            (Some(level), Some(role)) if role.level() == level => level,
            (Some(_), Some(_)) => {
                return Err(CurriculumError::Validation("grant level and role disagree".into()))
            }
            (None, None) => {
                return Err(CurriculumError::Validation("grant needs a level or a role".into()))
            }
        };
        let scope = PermissionScope::from_fields(
            self.content_id.as_deref(),
            self.subject.as_deref(),
            self.key_stage.as_deref(),
        )?;
        Ok((user, level, scope))
    }
}

/// Stored grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContentPermission {
    pub id: String,
    pub user_id: UserId,
    pub level: PermissionLevel,
    pub scope: PermissionScope,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

/// Outcome of resolution: the deciding grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPermission {
    pub grant_id: String,
    pub level: PermissionLevel,
    pub scope: PermissionScope,
}

/// Resolve the effective permission of `user` on `target` from a set of grants
pub fn resolve(
    grants: &[UserContentPermission],
    user: &UserId,
    target: &ContentRef,
) -> Option<ResolvedPermission> {
    grants
        .iter()
        .filter(|g| g.user_id == *user && g.scope.matches(target))
        .max_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then(a.scope.specificity().cmp(&b.scope.specificity()))
                // Equal level and scope kind: keep the result independent of input order
                .then(b.id.cmp(&a.id))
        })
        .map(|g| ResolvedPermission {
            grant_id: g.id.clone(),
            level: g.level,
            scope: g.scope.clone(),
        })
}

/// Pure permission check over a set of grants
pub fn has_permission(
    grants: &[UserContentPermission],
    user: &UserId,
    target: &ContentRef,
    required: PermissionLevel,
) -> bool {
    resolve(grants, user, target)
        .map(|r| r.level.satisfies(required))
        .unwrap_or(false)
}

/// Load the user's grants and fail with `PermissionDenied` unless `required` is met
pub fn require(
    conn: &Connection,
    user: &UserId,
    target: &ContentRef,
    required: PermissionLevel,
) -> Result<ResolvedPermission, CurriculumError> {
    let user_grants = grants::list_for_user(conn, user)?;
    match resolve(&user_grants, user, target) {
        Some(resolved) if resolved.level.satisfies(required) => {
            debug!(user = %user, target = %target, level = %resolved.level, "Permission granted");
            Ok(resolved)
        }
        _ => Err(CurriculumError::PermissionDenied {
            user: user.to_string(),
            target: target.to_string(),
            required,
        }),
    }
}

/// Resolved level of `user` on `target`, if any grant matches
pub fn effective_level(
    conn: &Connection,
    user: &UserId,
    target: &ContentRef,
) -> Result<Option<PermissionLevel>, CurriculumError> {
    let user_grants = grants::list_for_user(conn, user)?;
    Ok(resolve(&user_grants, user, target).map(|r| r.level))
}
