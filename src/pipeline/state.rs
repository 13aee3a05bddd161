use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validator::Violation;

/// An incoming topic request with its optional authoring hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LessonRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    /// Owner reference supplied by the caller; identity is verified elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl LessonRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialized,
    Analyzed,
    Rejected,
    Generated,
    Validated,
    ValidationFailed,
    Fixed,
    Saved,
    SaveFailed,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Analyzed => "analyzed",
            Self::Rejected => "rejected",
            Self::Generated => "generated",
            Self::Validated => "validated",
            Self::ValidationFailed => "validation_failed",
            Self::Fixed => "fixed",
            Self::Saved => "saved",
            Self::SaveFailed => "save_failed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "analyzed" => Ok(Self::Analyzed),
            "rejected" => Ok(Self::Rejected),
            "generated" => Ok(Self::Generated),
            "validated" => Ok(Self::Validated),
            "validation_failed" => Ok(Self::ValidationFailed),
            "fixed" => Ok(Self::Fixed),
            "saved" => Ok(Self::Saved),
            "save_failed" => Ok(Self::SaveFailed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Snapshot of one generation run. Each stage consumes a snapshot and returns the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationState {
    pub run_id: String,
    pub request: LessonRequest,
    pub title: String,
    pub source_text: String,
    /// Actionable findings for the current `source_text`.
    pub violations: Vec<Violation>,
    /// Non-actionable findings on the accepted candidate; never block acceptance.
    pub diagnostics: Vec<Violation>,
    pub attempt: u32,
    pub accepted: bool,
    pub record_id: Option<String>,
    pub phase: Phase,
    pub failure_reason: Option<String>,
    /// Collaborator stages executed so far (analyze, generate, fix, persist).
    pub stages_run: u32,
}

impl GenerationState {
    pub fn new(request: LessonRequest) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            request,
            title: String::new(),
            source_text: String::new(),
            violations: Vec::new(),
            diagnostics: Vec::new(),
            attempt: 0,
            accepted: false,
            record_id: None,
            phase: Phase::Initialized,
            failure_reason: None,
            stages_run: 0,
        }
    }

    pub fn violation_messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    pub fn analyzed(self, title: String) -> Self {
        Self {
            title,
            phase: Phase::Analyzed,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    pub fn rejected(self, reason: String) -> Self {
        Self {
            failure_reason: Some(reason),
            phase: Phase::Rejected,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    pub fn generated(self, source_text: String) -> Self {
        Self {
            source_text,
            phase: Phase::Generated,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    pub fn fixed(self, source_text: String) -> Self {
        Self {
            source_text,
            phase: Phase::Fixed,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    /// Candidate accepted: actionable findings are gone, diagnostics are kept for inspection.
    pub fn validated(self, diagnostics: Vec<Violation>) -> Self {
        Self {
            violations: Vec::new(),
            diagnostics,
            accepted: true,
            phase: Phase::Validated,
            ..self
        }
    }

    pub fn validation_failed(self, violations: Vec<Violation>) -> Self {
        Self {
            violations,
            diagnostics: Vec::new(),
            accepted: false,
            attempt: self.attempt + 1,
            phase: Phase::ValidationFailed,
            ..self
        }
    }

    pub fn saved(self, record_id: String) -> Self {
        Self {
            record_id: Some(record_id),
            phase: Phase::Saved,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    pub fn save_failed(self, reason: String) -> Self {
        Self {
            failure_reason: Some(reason),
            phase: Phase::SaveFailed,
            stages_run: self.stages_run + 1,
            ..self
        }
    }

    pub fn completed(self) -> Self {
        Self {
            phase: Phase::Completed,
            ..self
        }
    }

    /// Terminal failure. A reason recorded earlier (e.g. by `save_failed`) is kept.
    pub fn failed(self, reason: String) -> Self {
        Self {
            failure_reason: Some(self.failure_reason.clone().unwrap_or(reason)),
            record_id: None,
            phase: Phase::Failed,
            ..self
        }
    }

    /// Failure that records a stage that ran but produced nothing usable.
    pub fn stage_failed(self, reason: String) -> Self {
        Self {
            stages_run: self.stages_run + 1,
            ..self
        }
        .failed(reason)
    }
}
