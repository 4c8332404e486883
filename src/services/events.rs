//! Event system for curriculum operations
//!
//! Every committed mutation is announced on a broadcast bus after its
//! transaction commits. Listeners never observe uncommitted state.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::models::LearningStyle;
use crate::permissions::{PermissionLevel, PermissionScope};
use crate::workflow::WorkflowStatus;

/// Events emitted by services
#[derive(Debug, Clone, PartialEq)]
pub enum CurriculumEvent {
    // Content events
    ContentCreated {
        id: String,
        title: String,
        by: String,
    },
    ContentUpdated {
        id: String,
        version: u32,
        fields: Vec<&'static str>,
    },
    ContentDeleted {
        id: String,
        by: String,
    },
    StatusChanged {
        id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
        by: String,
    },

    // Variant events
    VariantAdapted {
        content_id: String,
        variant_id: String,
        style: LearningStyle,
        version: u32,
    },
    VariantRemoved {
        content_id: String,
        style: LearningStyle,
    },
    DefaultVariantChanged {
        content_id: String,
        variant_id: String,
    },

    // Unit events
    UnitCreated {
        id: String,
        title: String,
    },
    UnitUpdated {
        id: String,
        version: u32,
    },
    UnitReordered {
        id: String,
        version: u32,
    },
    UnitStatusChanged {
        id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
        warnings: usize,
    },
    UnitDeleted {
        id: String,
    },

    // Permission events
    PermissionGranted {
        grant_id: String,
        user_id: String,
        level: PermissionLevel,
        scope: PermissionScope,
    },
    PermissionRevoked {
        grant_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &CurriculumEvent);
}

/// Event bus for broadcasting curriculum events
pub struct EventBus {
    sender: broadcast::Sender<CurriculumEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: CurriculumEvent) {
        trace!(event = ?event, "Emitting curriculum event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<CurriculumEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CurriculumEvent) {
        match event {
            CurriculumEvent::ContentCreated { id, title, by } => {
                info!(id = %id, title = %title, by = %by, "Content created");
            }
            CurriculumEvent::ContentDeleted { id, by } => {
                info!(id = %id, by = %by, "Content deleted");
            }
            CurriculumEvent::StatusChanged { id, from, to, by } => {
                info!(id = %id, from = %from, to = %to, by = %by, "Status changed");
            }
            CurriculumEvent::VariantAdapted {
                content_id,
                style,
                version,
                ..
            } => {
                debug!(content = %content_id, style = %style, version, "Variant adapted");
            }
            CurriculumEvent::UnitStatusChanged {
                id,
                from,
                to,
                warnings,
            } => {
                info!(id = %id, from = %from, to = %to, warnings, "Unit status changed");
            }
            CurriculumEvent::PermissionGranted {
                user_id,
                level,
                scope,
                ..
            } => {
                info!(user = %user_id, level = %level, scope = %scope, "Permission granted");
            }
            _ => {
                trace!(event = ?event, "Curriculum event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
