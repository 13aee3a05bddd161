//! Typed error hierarchy for lessonforge.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError`: stage failures inside a generation run
//! - `SandboxError`: render-time loading of accepted modules
//! - `LessonStoreError`: lesson record lookups and writes

use thiserror::Error;

/// Errors raised by a single pipeline stage. The `Display` text is what ends up in
/// `GenerationState::failure_reason`, so every variant leads with its class.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model service error during {stage}: {source}")]
    Upstream {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out after {secs}s during {stage}")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("step guard tripped after {steps} steps")]
    StepGuard { steps: u32 },
}

/// Errors from loading or rendering an accepted module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("module was not accepted by the validator: {}", violations.join("; "))]
    NotAccepted { violations: Vec<String> },

    #[error("no default-exported entry component found")]
    MissingEntryPoint,

    #[error("could not lower module at offset {offset}: {message}")]
    Lowering { offset: usize, message: String },

    #[error("component <{name}> does not resolve in the module or its capability scope")]
    UnboundComponent { name: String },

    #[error("chart component {name} is not in the chart registry")]
    UnknownChart { name: String },

    #[error("element <{tag}> is not permitted")]
    ForbiddenElement { tag: String },

    #[error("entry {name} is not callable: {reason}")]
    NotCallable { name: String, reason: String },

    #[error("render depth exceeded the limit of {limit}")]
    DepthExceeded { limit: usize },
}

/// Errors from the lesson store.
#[derive(Debug, Error)]
pub enum LessonStoreError {
    #[error("Lesson {id} not found")]
    NotFound { id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
