//! Coverage model, record codec, collection and reporting.

pub mod collector;
pub mod model;
pub mod record;
pub mod report;

pub use collector::{find_record, load_record, CoverageCollector};
pub use model::{Counter, CoverageReport, CoverageSummary, CoverageUnit, FileCoverage};
