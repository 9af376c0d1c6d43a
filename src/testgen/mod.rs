pub mod candidate;
pub mod generator;
pub mod materialize;
pub mod skeleton;

pub use candidate::{PromptLineage, TestCandidate};
pub use generator::CandidateGenerator;
