// ABOUTME: Flashback capture engine - consistent backfill plus SCN-windowed change capture
// ABOUTME: Database access goes through FlashbackDatabase so the engine runs on any backend

pub mod backfill;
pub mod coordinator;
pub mod daemon;
pub mod database;
pub mod discovery;
pub mod incremental;
pub mod retention;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod state;
pub mod types;

pub use coordinator::{PhaseCoordinator, PhaseGuard, PhaseScope};
pub use daemon::{CaptureDaemon, CycleStats, DaemonConfig};
pub use database::FlashbackDatabase;
pub use discovery::{
    catalog_tables, discover_tables, ensure_readable, CatalogColumn, CatalogTable, DiscoveryOptions,
};
pub use retention::{validate_flashback, RetentionConfig, RetentionReport, MIN_RETENTION_SECONDS};
pub use session::{SessionState, StepOutcome, TableSession};
pub use sink::{CaptureSink, JsonLinesSink};
pub use state::{BackfillState, CaptureState, IncrementalState, ResourceState, SessionStatus};
pub use types::{ChangeOp, Column, RowEvent, RowId, RowVersion, Scn, SourceRow, Table};
