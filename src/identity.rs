//! Caller identity
//!
//! The engine never authenticates. Callers hand in an already-authenticated
//! user id on every operation that needs one; there is no ambient "current user".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CurriculumError;

/// Authenticated user identifier supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a caller-supplied id; empty or blank ids are rejected
    pub fn new(id: impl Into<String>) -> Result<Self, CurriculumError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CurriculumError::Validation("user id is required".into()));
        }
        if id.len() > 255 {
            return Err(CurriculumError::Validation("user id must be <= 255 characters".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
