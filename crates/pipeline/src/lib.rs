//! Resumable stage machine that turns a video into captions, copy,
//! translations and narration.

pub mod orchestrator;
pub mod prompts;
pub mod srt;
pub mod stages;
pub mod template;
pub mod tools;

pub use orchestrator::{approve, reset, set_knowledge, Orchestrator, RunReport, RunStatus};
pub use stages::{StageContext, StageOutcome};
pub use template::ParsedTemplate;
pub use tools::{
    Approver, AutoApprove, Checkpoint, Decision, DeferApproval, MediaTools, Narrator, Segment,
    Transcript,
};
