//! Curriculum Content - lifecycle engine for curriculum material
//!
//! Manages content items from first draft to publication:
//!
//! - **Metadata & versions**: every persisted mutation bumps a version and
//!   leaves one record in an append-only change ledger
//! - **Workflow**: a role-gated six-state publishing state machine
//! - **Permissions**: per-user grants scoped to a content item, subject or key stage
//! - **Variants**: one body per learning style, generated by an injected
//!   [`VariantGenerator`](adaptation::VariantGenerator)
//! - **Search**: attribute filters with 1-indexed pagination
//! - **Units**: ordered teaching sequences with prerequisite edges
//!
//! ## Storage Layout
//!
//! ```text
//! $XDG_DATA_HOME/curriculum-content/
//! ├── curriculum.db          # SQLite database (content, ledger, grants, units)
//! └── config.toml            # Configuration
//! ```
//!
//! ## Concurrency
//!
//! Mutations on one content item or unit are serialized by a per-key lock
//! ([`locks::KeyedLocks`]) and each commits in a single SQLite transaction with
//! a version compare-and-swap.

pub mod config;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod workflow;
pub mod models;
pub mod locks;
pub mod adaptation;
pub mod db;
pub mod services;

// Re-exports
pub use config::{Config, LockPolicy};
pub use error::{CurriculumError, Result};
pub use identity::UserId;
pub use permissions::{ContentRef, GrantRequest, PermissionLevel, PermissionScope, Role, UserContentPermission};
pub use workflow::WorkflowStatus;
pub use models::{
    ChangeType, ContentChangeRecord, ContentMetadata, ContentPatch, ContentVariant, CreateContentInput,
    CreateUnitInput, CurriculumContent, CurriculumUnit, DifficultyLevel, LearningStyle, NewVariant,
};
pub use adaptation::{FnGenerator, GenerationError, TemplateGenerator, VariantGenerator};
pub use db::ContentDb;
pub use db::search::{SearchFilters, SearchResults, Sort, SortField, SortOrder};
pub use services::{CurriculumEvent, EventBus, Services};
