//! Crate-wide error taxonomy (`spec.md` §7) and the recovery policy each kind maps to.

use crate::theory::judge::JudgeErrorCode;
use thiserror::Error;

/// The single error type every component returns up through the pipeline. Each variant carries
/// exactly the diagnostic fields the `spec.md` §7 table names, so the orchestrator never has to
/// reconstruct context after the fact.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient categories: {categories} categories across {interviews} interviews ({codes} codes)")]
    InsufficientCategories {
        categories: usize,
        codes: usize,
        interviews: usize,
    },

    #[error("project locked, retry after {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },

    #[error("budget exceeded for stage {stage} after {steps_taken} degrade steps")]
    BudgetExceeded { stage: String, steps_taken: usize },

    #[error("LLM call timed out after {elapsed_ms}ms")]
    LlmTimeout { elapsed_ms: u64 },

    #[error("LLM call failed: {message}")]
    LlmError { message: String },

    #[error("theory judge failed in strict mode: {codes:?}")]
    JudgeFailed { codes: Vec<JudgeErrorCode> },

    #[error("{store} store transient error: {message}")]
    StoreTransient { store: &'static str, message: String },

    #[error("{store} store fatal error: {source}")]
    StoreFatal {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited")]
    RateLimited,

    #[error("interview has no fragments")]
    EmptyInterview,

    #[error("json decode failed: {reason} (first 300 chars: {excerpt})")]
    JsonDecode { reason: String, excerpt: String },
}

/// How the orchestrator should react to a given [`PipelineError`]. Grounded in the teacher's
/// `ErrorHandler::register_strategy` / `RecoveryStrategy` split (`error_handler/mod.rs`),
/// specialised to this crate's nine-row table instead of the teacher's six agent strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing can be done locally; surface to the client as-is.
    Abort,
    /// Retry the failed call up to `max_attempts` times with the given base backoff.
    Retry {
        max_attempts: u32,
        base_backoff_ms: u64,
    },
    /// Drop the degraded component (e.g. a store projection) and continue the pipeline.
    Degrade,
    /// Roll back the current transaction and fail the task.
    Rollback,
}

impl PipelineError {
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            PipelineError::NotFound { .. } => RecoveryAction::Abort,
            PipelineError::InsufficientCategories { .. } => RecoveryAction::Abort,
            PipelineError::Locked { .. } => RecoveryAction::Abort,
            PipelineError::BudgetExceeded { .. } => RecoveryAction::Abort,
            PipelineError::LlmTimeout { .. } | PipelineError::LlmError { .. } => {
                RecoveryAction::Retry {
                    max_attempts: 2,
                    base_backoff_ms: 500,
                }
            }
            PipelineError::JudgeFailed { .. } => RecoveryAction::Retry {
                max_attempts: 1,
                base_backoff_ms: 0,
            },
            PipelineError::StoreTransient { .. } => RecoveryAction::Retry {
                max_attempts: 3,
                base_backoff_ms: 250,
            },
            PipelineError::StoreFatal { .. } => RecoveryAction::Rollback,
            PipelineError::RateLimited => RecoveryAction::Abort,
            PipelineError::EmptyInterview => RecoveryAction::Abort,
            PipelineError::JsonDecode { .. } => RecoveryAction::Degrade,
        }
    }

    /// Stable machine-readable code for clients, matching `spec.md` §7's "stable codes".
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "NOT_FOUND",
            PipelineError::InsufficientCategories { .. } => "INSUFFICIENT_CATEGORIES",
            PipelineError::Locked { .. } => "LOCKED",
            PipelineError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            PipelineError::LlmTimeout { .. } => "LLM_TIMEOUT",
            PipelineError::LlmError { .. } => "LLM_ERROR",
            PipelineError::JudgeFailed { .. } => "JUDGE_FAILED",
            PipelineError::StoreTransient { .. } => "STORE_TRANSIENT",
            PipelineError::StoreFatal { .. } => "STORE_FATAL",
            PipelineError::RateLimited => "RATE_LIMITED",
            PipelineError::EmptyInterview => "EMPTY_INTERVIEW",
            PipelineError::JsonDecode { .. } => "JSON_DECODE_ERROR",
        }
    }
}
