//! unitforge: AI-assisted unit test generation.
//!
//! Targets are resolved from source, a backend drafts a test for each,
//! the test is compiled and run in a scratch copy of the project, and
//! failures are fed back into the next draft until one passes or the
//! attempt budget runs out. Accepted tests contribute coverage to a
//! batch-wide report.

pub mod batch;
pub mod config;
pub mod coverage;
pub mod detectors;
pub mod error;
pub mod llm;
pub mod logger;
pub mod repair;
pub mod resolve;
pub mod testgen;
pub mod verify;
