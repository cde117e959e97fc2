//! Deletion machinery: the shared delete gate, the remover and the two
//! maintenance loops (free space per device, retention across devices).

pub mod gate;
pub mod remover;
pub mod retention;
pub mod space;

pub use gate::DeleteGate;
pub use remover::{DeleteReason, RecordingRemover, RemovalReceipt};
pub use retention::{RetentionSweeper, SweepSummary};
pub use space::{MaintainerState, PassOutcome, SpaceMaintainer, adaptive_interval};
