pub mod backend;
pub mod client;
pub mod command;
pub mod prompt;

pub use backend::{from_config, CompletionBackend};
pub use prompt::LlmPrompt;
