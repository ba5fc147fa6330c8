use std::path::PathBuf;

use crate::llm::LLMProvider;

/// Fatal precondition failures. Anything that reaches `main` as one of these
/// aborts the stage with a nonzero exit code; per-item failures never do.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    #[error("required input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("transcript preflight failed: {}", .0.join("; "))]
    PreflightFailed(Vec<String>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("LLM provider {0:?} is not reachable")]
    LlmUnavailable(LLMProvider),
}
