pub mod coordinator;
pub mod report;

pub use coordinator::BatchCoordinator;
pub use report::{BatchOutcome, BatchReport, CoverageDelta};
