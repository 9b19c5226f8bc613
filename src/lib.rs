// Station Keeper - Core Library
// Exposes the store, service, HTTP façade and reconciler for the server, the CLI and tests

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod reconciler;
pub mod service;
pub mod station;

// Re-export commonly used types
pub use crate::api::{create_app, create_router, ApiError, AppState};
pub use crate::config::AppConfig;
pub use crate::db::{setup_database, SqliteStationStore, StationStore};
pub use crate::error::{StationError, StationResult};
pub use crate::reconciler::{OverlapPolicy, Reconciler, ReconcilerConfig, TickOutcome};
pub use crate::service::StationService;
pub use crate::station::{DeleteAck, NewStation, Station, StationUpdate, UpdateAck};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
