//! Adaptive tutor orchestrator
//!
//! Routes learner interactions through capability nodes, schedules
//! spaced-repetition reviews and serves the HTTP API and walk events.

pub mod api;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod router;
pub mod scheduler;
pub mod services;
pub mod session;
pub mod state;
pub mod store;

pub use api::{create_router, AppState, ErrorResponse, ServiceStatus};
pub use capabilities::Context;
pub use config::{Config, PolicyConfig, SchedulerConfig, SessionConfig};
pub use error::{Result, ServiceKind, TutorError};
pub use events::{EventBroadcaster, WalkEvent};
pub use graph::{Node, Orchestrator, MAX_STEPS};
pub use model::{
    LearnerProfile, Level, PendingActivity, Pillar, PillarScores, ReviewItem, Schedule,
    ScheduleEntry,
};
pub use router::RequestType;
pub use services::{ContentService, SpeechService};
pub use session::{MemorySessionStore, SessionStore, SpeakingSession};
pub use state::{InteractionRequest, InteractionState};
pub use store::{MemoryStore, Persistence, StoreSnapshot};
