//! Publishing workflow
//!
//! Statuses are a tagged state; legal moves live in an explicit edge table.
//! The graph is cyclic: `archived` and `rejected` both lead back to `draft`
//! (and `archived` back to `published`), so nothing here is terminal.
//!
//! | from | to | min. level | comment |
//! |------|----|-----------|---------|
//! | draft | review | edit | no |
//! | review | approved | approve | no |
//! | review | rejected | approve | yes |
//! | review | draft | approve | yes |
//! | approved | published | admin | no |
//! | approved | draft | edit | yes |
//! | published | archived | admin | no |
//! | published | draft | admin | yes |
//! | rejected | draft | edit | no |
//! | archived | published | admin | no |
//! | archived | draft | admin | no |
//!
//! There is no edge from `draft` to `published`; publication always passes
//! through `review` and `approved`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CurriculumError;
use crate::permissions::PermissionLevel;

/// Publication status of a content item or unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Review,
    Approved,
    Published,
    Archived,
    Rejected,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Draft,
        WorkflowStatus::Review,
        WorkflowStatus::Approved,
        WorkflowStatus::Published,
        WorkflowStatus::Archived,
        WorkflowStatus::Rejected,
    ];

    /// Everything is created in draft
    pub fn initial() -> Self {
        WorkflowStatus::Draft
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Review => "review",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Published => "published",
            WorkflowStatus::Archived => "archived",
            WorkflowStatus::Rejected => "rejected",
        }
    }

    /// Statuses in which hard deletion is allowed
    pub fn is_deletable(&self) -> bool {
        matches!(self, WorkflowStatus::Draft | WorkflowStatus::Archived)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CurriculumError::Validation(format!("unknown workflow status '{}'", s)))
    }
}

/// One row of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRule {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub min_level: PermissionLevel,
    pub comment_required: bool,
}

const fn edge(
    from: WorkflowStatus,
    to: WorkflowStatus,
    min_level: PermissionLevel,
    comment_required: bool,
) -> TransitionRule {
    TransitionRule {
        from,
        to,
        min_level,
        comment_required,
    }
}

/// The complete set of legal transitions
pub const TRANSITIONS: [TransitionRule; 11] = {
    use PermissionLevel::*;
    use WorkflowStatus::*;
    [
        edge(Draft, Review, Edit, false),
        edge(Review, Approved, Approve, false),
        edge(Review, Rejected, Approve, true),
        edge(Review, Draft, Approve, true),
        edge(Approved, Published, Admin, false),
        edge(Approved, Draft, Edit, true),
        edge(Published, Archived, Admin, false),
        edge(Published, Draft, Admin, true),
        edge(Rejected, Draft, Edit, false),
        edge(Archived, Published, Admin, false),
        edge(Archived, Draft, Admin, false),
    ]
};

/// Look up the edge `from -> to`
pub fn rule(from: WorkflowStatus, to: WorkflowStatus) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

/// All edges leaving `from`
pub fn targets_from(from: WorkflowStatus) -> impl Iterator<Item = &'static TransitionRule> {
    TRANSITIONS.iter().filter(move |r| r.from == from)
}

/// Normalise an optional comment; blank comments count as absent
pub fn normalize_comment(comment: Option<&str>) -> Option<String> {
    comment
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Validate a requested transition for a caller holding `level`.
///
/// Checks run in a fixed order: the edge must exist (regardless of capability),
/// then the capability threshold, then the comment requirement. `target` is
/// only used to label a permission failure.
pub fn check(
    from: WorkflowStatus,
    to: WorkflowStatus,
    level: Option<PermissionLevel>,
    comment: Option<&str>,
    user: &str,
    target: &str,
) -> Result<&'static TransitionRule, CurriculumError> {
    let rule = rule(from, to).ok_or(CurriculumError::InvalidTransition { from, to })?;

    if !level.map(|l| l.satisfies(rule.min_level)).unwrap_or(false) {
        return Err(CurriculumError::PermissionDenied {
            user: user.to_string(),
            target: target.to_string(),
            required: rule.min_level,
        });
    }

    if rule.comment_required && normalize_comment(comment).is_none() {
        return Err(CurriculumError::MissingComment { from, to });
    }

    Ok(rule)
}

/// Change-record description for a status change
pub fn describe(from: WorkflowStatus, to: WorkflowStatus, comment: Option<&str>) -> String {
    match normalize_comment(comment) {
        Some(comment) => format!("Status {} -> {}: {}", from, to, comment),
        None => format!("Status {} -> {}", from, to),
    }
}
