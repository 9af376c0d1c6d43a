pub mod orchestrator;
pub mod policy;
pub mod session;

pub use orchestrator::{LoopEvent, LoopState, RepairLoop};
pub use policy::RetryPolicy;
pub use session::{AbandonReason, Attempt, RepairSession, SessionSummary, TerminalStatus};
