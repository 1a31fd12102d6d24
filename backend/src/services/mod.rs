//! Service layer for reconciliation and board composition.
//!
//! Services sit between the persisted store, the external schedule and
//! forecast collaborators, and the HTTP layer.

pub mod authority;
pub mod board;
pub mod cache;
pub mod guards;
pub mod overlay;
pub mod synthetic;

pub use authority::{has_operator_schedule, resolve_authority, OperatorScheduleSummary};
pub use board::{BoardError, CorridorBoardComposer};
pub use cache::{BoardCaches, OperatorStatusCache, ScheduleCache, SchemaValidationCache, TtlCache};
pub use guards::{
    canonical_schedule_source, check_authority_purity, check_cancellation_completeness,
    validate_board, GuardViolation,
};
pub use overlay::{
    decide, merge_observations, merge_two, IngestError, IngestOptions, IngestReport,
    OperatorSnapshot, ReconcileDecision, ReconcileOutcome, SnapshotSailing, StatusChange,
    StatusOverlayStore, REMOVED_FROM_SCHEDULE_REASON,
};
pub use synthetic::build_synthetic_sailings;
