use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// How a candidate's prompt was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptLineage {
    /// SHA-256 of the prompt ABI version and both prompt parts
    pub prompt_hash: String,
    /// Candidate this one repairs, if any
    pub parent: Option<Uuid>,
    /// Attempt numbers whose diagnostics were folded into the prompt
    pub folded_attempts: Vec<u32>,
}

/// One generated test source.
///
/// Owned by exactly one repair loop; verification only borrows it.
#[derive(Debug, Clone, Serialize)]
pub struct TestCandidate {
    pub id: Uuid,
    pub target_id: String,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub lineage: PromptLineage,
}

impl TestCandidate {
    pub fn new(target_id: impl Into<String>, attempt: u32, source: String, lineage: PromptLineage) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            attempt,
            created_at: Utc::now(),
            source,
            lineage,
        }
    }

    /// Short id for logs.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}
