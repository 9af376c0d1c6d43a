//! generator.rs
//!
//! Candidate generation: target + prior attempts → one test candidate.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{BackendError, GenerationError};
use crate::llm::backend::CompletionBackend;
use crate::llm::prompt::build_prompt;
use crate::repair::session::Attempt;
use crate::resolve::GenerationTarget;
use crate::testgen::candidate::{PromptLineage, TestCandidate};
use crate::testgen::skeleton::skeleton;

#[derive(Clone)]
pub struct CandidateGenerator {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
    max_tokens: u32,
    history_window: usize,
    history_char_budget: usize,
    crate_name: Option<String>,
}

impl CandidateGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, cfg: &EngineConfig) -> Self {
        Self {
            backend,
            timeout: cfg.generation_timeout(),
            max_tokens: cfg.max_tokens,
            history_window: cfg.history_window,
            history_char_budget: cfg.history_char_budget,
            crate_name: None,
        }
    }

    /// Crate name used in Rust skeleton imports.
    pub fn with_crate_name(mut self, name: Option<String>) -> Self {
        self.crate_name = name;
        self
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// Produce the candidate for `attempt`. `history` is the full, ordered
    /// attempt history of the session; only a window of it reaches the prompt.
    pub async fn generate(
        &self,
        target: &GenerationTarget,
        history: &[Attempt],
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<TestCandidate, GenerationError> {
        let window = history_window(history, self.history_window, self.history_char_budget);
        let skel = skeleton(target, self.crate_name.as_deref());
        let prompt = build_prompt(target, &skel, &window);

        let lineage = PromptLineage {
            prompt_hash: prompt.hash(),
            parent: history.last().map(|a| a.candidate.id),
            folded_attempts: window.iter().map(|a| a.candidate.attempt).collect(),
        };

        tracing::debug!(
            target_id = %target.id,
            attempt,
            folded = ?lineage.folded_attempts,
            prompt_chars = prompt.len(),
            "requesting candidate"
        );

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.backend.complete(&prompt, self.max_tokens)) => match res {
                Err(_) => return Err(GenerationError::Timeout(self.timeout)),
                Ok(r) => r?,
            },
        };

        let source = extract_code(&reply)
            .ok_or_else(|| BackendError::Malformed("reply contains no code".into()))?;

        Ok(TestCandidate::new(target.id.clone(), attempt, source, lineage))
    }
}

/// The most recent `max_items` attempts, then oldest dropped until the
/// folded text fits `char_budget`.
pub fn history_window(history: &[Attempt], max_items: usize, char_budget: usize) -> Vec<&Attempt> {
    let start = history.len().saturating_sub(max_items);
    let mut window: Vec<&Attempt> = history[start..].iter().collect();

    let mut total: usize = window.iter().map(|a| attempt_chars(a)).sum();
    while total > char_budget && !window.is_empty() {
        total -= attempt_chars(window.remove(0));
    }

    window
}

fn attempt_chars(a: &Attempt) -> usize {
    a.candidate.source.len()
        + a.diagnostic.message.len()
        + a.diagnostic.stack.iter().map(String::len).sum::<usize>()
}

/// First fenced block, else the whole trimmed reply. `None` when empty.
pub fn extract_code(reply: &str) -> Option<String> {
    let code = match reply.find("```") {
        Some(open) => {
            let after = &reply[open + 3..];
            // skip the info string (language tag)
            let body = after.split_once('\n').map_or("", |(_, b)| b);
            match body.find("```") {
                Some(close) => &body[..close],
                None => body,
            }
        }
        None => reply,
    };

    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}
