//! Service layer for curriculum-content
//!
//! Services encapsulate the lifecycle rules between callers and the repository
//! functions in `db/`. Each mutating service call:
//! - validates input
//! - takes the per-key lock for the entity it mutates
//! - resolves the caller's capability
//! - commits data, version bump and change record in one transaction
//! - emits an event after commit
//!
//! ## Architecture
//!
//! ```text
//! Callers (CLI, embedding application)
//!     ↓
//! Service Layer (lifecycle rules)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod content_service;
pub mod workflow_service;
pub mod variant_service;
pub mod search_service;
pub mod unit_service;
pub mod permission_service;

// Re-exports
pub use events::{spawn_logging_listener, CurriculumEvent, EventBus, EventListener, LoggingEventListener};
pub use content_service::ContentService;
pub use workflow_service::WorkflowService;
pub use variant_service::{AdaptOutcome, VariantService};
pub use search_service::SearchService;
pub use unit_service::{IntegrityWarning, UnitService, UnitTransitionOutcome};
pub use permission_service::PermissionService;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::ContentDb;
use crate::error::CurriculumError;
use crate::locks::KeyedLocks;

/// Service container for dependency injection
///
/// Holds all services over one shared database, lock registry and event bus.
pub struct Services {
    pub content: Arc<ContentService>,
    pub workflow: Arc<WorkflowService>,
    pub variants: Arc<VariantService>,
    pub search: Arc<SearchService>,
    pub units: Arc<UnitService>,
    pub permissions: Arc<PermissionService>,
    pub events: Arc<EventBus>,
    pub locks: Arc<KeyedLocks>,
    pub db: Arc<ContentDb>,
}

impl Services {
    /// Create all services with a shared database
    pub fn new(db: Arc<ContentDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let locks = Arc::new(KeyedLocks::new(config.lock_policy, config.lock_timeout()));

        Self {
            content: Arc::new(ContentService::new(db.clone(), locks.clone(), events.clone())),
            workflow: Arc::new(WorkflowService::new(db.clone(), locks.clone(), events.clone())),
            variants: Arc::new(VariantService::new(db.clone(), locks.clone(), events.clone())),
            search: Arc::new(SearchService::new(
                db.clone(),
                config.default_page_size,
                config.max_page_size,
            )),
            units: Arc::new(UnitService::new(db.clone(), locks.clone(), events.clone())),
            permissions: Arc::new(PermissionService::new(db.clone(), events.clone())),
            events,
            locks,
            db,
        }
    }

    /// Open the configured database file and build services over it
    pub fn open(config: &Config) -> Result<Self, CurriculumError> {
        config.validate()?;
        let path = config.database_path();
        info!(path = ?path, policy = ?config.lock_policy, "Opening curriculum store");
        let db = Arc::new(ContentDb::open(&path)?);
        Ok(Self::new(db, config))
    }

    /// Services over an in-memory database (for testing)
    pub fn in_memory(config: &Config) -> Result<Self, CurriculumError> {
        let db = Arc::new(ContentDb::open_in_memory()?);
        Ok(Self::new(db, config))
    }
}
