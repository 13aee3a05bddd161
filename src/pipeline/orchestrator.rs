//! Drives one generation run from request to a terminal phase.
//!
//! Each step asks [`next_action`] what to do, runs at most one collaborator stage and
//! replaces the state snapshot with the stage's result. Every suspension point is
//! bounded by `stage_timeout` and observes the cancellation token.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::state::{GenerationState, LessonRequest, Phase};
use super::transition::{Action, max_stages, next_action};
use super::{ModuleStore, PipelineSettings};
use crate::errors::{PipelineError, SandboxError};
use crate::generate::{Analysis, AuthoringHints, CodeFixer, CodeGenerator, ModelService, PromptAnalyzer};
use crate::lessons::models::NewLesson;
use crate::lessons::ws::{WsMessage, broadcast_message};
use crate::sandbox::{AcceptedSource, SandboxLoader};
use crate::validator::{Violation, ViolationCode, validate_source};

pub struct Orchestrator {
    model: Arc<dyn ModelService>,
    store: Arc<dyn ModuleStore>,
    settings: PipelineSettings,
    events: Option<broadcast::Sender<String>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelService>,
        store: Arc<dyn ModuleStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            model,
            store,
            settings,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish phase changes to WebSocket subscribers.
    pub fn with_events(mut self, tx: broadcast::Sender<String>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run a request to a terminal phase. Never fails: every error ends in `Rejected` or `Failed`.
    pub async fn run(&self, request: LessonRequest) -> GenerationState {
        let state = GenerationState::new(request);
        let span = tracing::info_span!("generation", run_id = %state.run_id);
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: GenerationState) -> GenerationState {
        let bound = self.settings.bounded_retries.max(1);
        let step_limit = max_stages(bound) * 3 + 4;
        let mut steps = 0u32;

        tracing::info!(prompt_chars = state.request.prompt.len(), bound, "Generation started");
        self.emit(WsMessage::GenerationStarted {
            run_id: state.run_id.clone(),
            prompt: state.request.prompt.clone(),
        });

        loop {
            let action = next_action(
                state.phase,
                state.accepted,
                state.attempt,
                state.violations.len(),
                bound,
            );
            if action == Action::Stop {
                break;
            }
            steps += 1;
            if steps > step_limit {
                let err = PipelineError::StepGuard { steps };
                tracing::error!(error = %err, phase = %state.phase, "Aborting run");
                state = state.failed(err.to_string());
                break;
            }

            state = self.step(action, state).await;
            tracing::info!(phase = %state.phase, attempt = state.attempt, "Phase changed");
            self.emit(WsMessage::GenerationPhase {
                run_id: state.run_id.clone(),
                phase: state.phase,
                attempt: state.attempt,
            });
        }

        match state.phase {
            Phase::Completed => tracing::info!(
                lesson_id = state.record_id.as_deref().unwrap_or_default(),
                attempts = state.attempt,
                stages = state.stages_run,
                "Generation completed"
            ),
            Phase::Rejected => tracing::info!(
                reason = state.failure_reason.as_deref().unwrap_or_default(),
                "Request rejected"
            ),
            _ => tracing::error!(
                reason = state.failure_reason.as_deref().unwrap_or_default(),
                attempts = state.attempt,
                stages = state.stages_run,
                "Generation failed"
            ),
        }
        self.emit(WsMessage::GenerationFinished {
            run_id: state.run_id.clone(),
            phase: state.phase,
            lesson_id: state.record_id.clone(),
            error: state.failure_reason.clone(),
        });
        state
    }

    async fn step(&self, action: Action, state: GenerationState) -> GenerationState {
        match action {
            Action::Analyze => self.analyze(state).await,
            Action::Generate => self.generate(state).await,
            Action::Validate => self.validate(state),
            Action::Fix => self.fix(state).await,
            Action::Persist => self.persist(state).await,
            Action::Complete => state.completed(),
            Action::Fail => {
                let reason = failure_reason(&state);
                state.failed(reason)
            }
            Action::Stop => state,
        }
    }

    async fn analyze(&self, state: GenerationState) -> GenerationState {
        let analyzer = PromptAnalyzer::new(self.model.as_ref(), self.settings.title_max_chars);
        let outcome = self
            .model_call("analyze", analyzer.analyze(&state.request.prompt))
            .await;
        match outcome {
            Ok(Analysis::Accepted { title }) => {
                tracing::info!(title = %title, "Request accepted");
                state.analyzed(title)
            }
            Ok(Analysis::Rejected { reason }) => state.rejected(reason),
            Err(e) => stage_failed(state, e),
        }
    }

    async fn generate(&self, state: GenerationState) -> GenerationState {
        let hints = AuthoringHints {
            audience: state.request.audience.as_deref(),
            tone: state.request.tone.as_deref(),
        };
        let generator = CodeGenerator::new(self.model.as_ref());
        let outcome = self
            .model_call(
                "generate",
                generator.generate(&state.title, &state.request.prompt, &hints),
            )
            .await;
        match outcome {
            Ok(source) => state.generated(source),
            Err(e) => stage_failed(state, e),
        }
    }

    fn validate(&self, state: GenerationState) -> GenerationState {
        let result = validate_source(&state.source_text);
        let diagnostics = result.diagnostics();
        for diagnostic in &diagnostics {
            tracing::warn!(code = %diagnostic.code, message = %diagnostic.message, "Non-actionable diagnostic");
        }

        let actionable = result.actionable();
        if !actionable.is_empty() {
            let messages: Vec<&str> = actionable.iter().map(|v| v.message.as_str()).collect();
            tracing::warn!(
                attempt = state.attempt + 1,
                violations = ?messages,
                "Candidate failed validation"
            );
            return state.validation_failed(actionable);
        }

        if self.settings.probe_before_save
            && let Err(e) = probe(&state.source_text, &state.run_id)
        {
            tracing::warn!(error = %e, attempt = state.attempt + 1, "Render probe failed");
            return state.validation_failed(vec![Violation::new(
                ViolationCode::ProbeFailed,
                format!("Render probe failed: {e}"),
            )]);
        }

        state.validated(diagnostics)
    }

    async fn fix(&self, state: GenerationState) -> GenerationState {
        let fixer = CodeFixer::new(self.model.as_ref());
        let outcome = self
            .model_call("fix", fixer.fix(&state.source_text, &state.violations))
            .await;
        match outcome {
            Ok(source) => state.fixed(source),
            Err(e) => stage_failed(state, e),
        }
    }

    async fn persist(&self, state: GenerationState) -> GenerationState {
        let lesson = NewLesson {
            title: state.title.clone(),
            prompt: state.request.prompt.clone(),
            source_text: state.source_text.clone(),
            owner_id: state.request.owner.clone(),
            audience: state.request.audience.clone(),
            tone: state.request.tone.clone(),
        };
        match self.guard("persist", self.store.save(lesson)).await {
            Ok(Ok(record)) => {
                tracing::info!(lesson_id = %record.id, "Lesson saved");
                state.saved(record.id)
            }
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                tracing::error!(error = %message, "Store write failed");
                state.save_failed(message)
            }
            Err(e) => {
                tracing::error!(error = %e, "Store write did not finish");
                state.save_failed(e.to_string())
            }
        }
    }

    /// A model call whose failure is classified as an upstream error.
    async fn model_call<T, F>(&self, stage: &'static str, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.guard(stage, fut).await? {
            Ok(value) => Ok(value),
            Err(source) => Err(PipelineError::Upstream { stage, source }),
        }
    }

    /// Bound a suspension point by the stage timeout and the cancellation token.
    async fn guard<T, F>(
        &self,
        stage: &'static str,
        fut: F,
    ) -> Result<anyhow::Result<T>, PipelineError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limit = self.settings.stage_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
            outcome = tokio::time::timeout(limit, fut) => outcome.map_err(|_| PipelineError::Timeout {
                stage,
                secs: limit.as_secs(),
            }),
        }
    }

    fn emit(&self, msg: WsMessage) {
        if let Some(tx) = &self.events {
            broadcast_message(tx, &msg);
        }
    }
}

fn stage_failed(state: GenerationState, err: PipelineError) -> GenerationState {
    tracing::error!(error = %err, phase = %state.phase, "Stage failed");
    state.stage_failed(err.to_string())
}

fn failure_reason(state: &GenerationState) -> String {
    match state.phase {
        Phase::ValidationFailed => format!(
            "Validation failed after {} attempts: {}",
            state.attempt,
            state.violation_messages().join("; ")
        ),
        _ => "Maximum retry attempts reached".to_string(),
    }
}

/// Load and render the candidate once, exactly as the render endpoint would.
fn probe(source_text: &str, module_id: &str) -> Result<(), SandboxError> {
    let source = AcceptedSource::validate(source_text)?;
    SandboxLoader::default().load(&source, module_id)?.render()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lessons::models::LessonRecord;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const ANALYSIS_OK: &str = r#"{"isValid": true, "title": "Fractions"}"#;

    const CLEAN: &str = r#"```tsx
"use client";
import React, { useState } from 'react';

export default function LessonComponent() {
  const [n, setN] = useState(1);
  return <div className="bg-blue-200"><h1>Fractions</h1><p>{n}/2</p></div>;
}
```"#;

    /// Passes the validator but references a component nothing defines.
    const UNBOUND: &str = r#""use client";
import React from 'react';

export default function LessonComponent() {
  return <div className="bg-blue-200"><Widget /></div>;
}
"#;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelService for ScriptedModel {
        async fn complete(&self, system: &str, _user: &str) -> Result<String> {
            self.calls.lock().unwrap().push(system.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ModelService for SlowModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ANALYSIS_OK.to_string())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<NewLesson>>,
    }

    #[async_trait]
    impl ModuleStore for MemoryStore {
        async fn save(&self, lesson: NewLesson) -> Result<LessonRecord> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(lesson.clone());
            Ok(LessonRecord {
                id: format!("lesson-{}", saved.len()),
                title: lesson.title,
                prompt: lesson.prompt,
                source_text: lesson.source_text,
                owner_id: lesson.owner_id,
                audience: lesson.audience,
                tone: lesson.tone,
                created_at: "2026-01-01T00:00:00+00:00".into(),
            })
        }
    }

    fn orchestrator(
        model: Arc<dyn ModelService>,
        store: Arc<dyn ModuleStore>,
        settings: PipelineSettings,
    ) -> Orchestrator {
        Orchestrator::new(model, store, settings)
    }

    #[tokio::test]
    async fn clean_candidate_is_saved_with_request_fields() {
        let model = ScriptedModel::new(vec![Ok(ANALYSIS_OK.into()), Ok(CLEAN.into())]);
        let store = Arc::new(MemoryStore::default());
        let mut request = LessonRequest::new("teach me fractions");
        request.owner = Some("user-7".into());
        request.audience = Some("grade 3".into());

        let state = orchestrator(model.clone(), store.clone(), PipelineSettings::default())
            .run(request)
            .await;

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.record_id.as_deref(), Some("lesson-1"));
        assert_eq!(state.stages_run, 3);
        assert_eq!(model.call_count(), 2);
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved[0].owner_id.as_deref(), Some("user-7"));
        assert_eq!(saved[0].audience.as_deref(), Some("grade 3"));
        assert!(saved[0].source_text.starts_with("\"use client\";"));
    }

    #[tokio::test]
    async fn upstream_failure_is_classified() {
        let model = ScriptedModel::new(vec![Err(anyhow::anyhow!("HTTP 503"))]);
        let state = orchestrator(model, Arc::new(MemoryStore::default()), PipelineSettings::default())
            .run(LessonRequest::new("teach me fractions"))
            .await;
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(
            state.failure_reason.as_deref(),
            Some("model service error during analyze: HTTP 503")
        );
        assert_eq!(state.stages_run, 1);
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let settings = PipelineSettings {
            stage_timeout: Duration::from_millis(50),
            ..PipelineSettings::default()
        };
        let state = orchestrator(Arc::new(SlowModel), Arc::new(MemoryStore::default()), settings)
            .run(LessonRequest::new("teach me fractions"))
            .await;
        assert_eq!(state.phase, Phase::Failed);
        assert!(
            state
                .failure_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("timed out") && r.contains("analyze"))
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let token = CancellationToken::new();
        token.cancel();
        let model = ScriptedModel::new(vec![Ok(ANALYSIS_OK.into())]);
        let state = orchestrator(model.clone(), Arc::new(MemoryStore::default()), PipelineSettings::default())
            .with_cancellation(token)
            .run(LessonRequest::new("teach me fractions"))
            .await;
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.failure_reason.as_deref(), Some("cancelled during analyze"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn probe_failure_reenters_the_fix_loop() {
        let model = ScriptedModel::new(vec![
            Ok(ANALYSIS_OK.into()),
            Ok(UNBOUND.into()),
            Ok(CLEAN.into()),
        ]);
        let store = Arc::new(MemoryStore::default());
        let state = orchestrator(model.clone(), store.clone(), PipelineSettings::default())
            .run(LessonRequest::new("teach me fractions"))
            .await;

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.attempt, 1);
        let calls = model.calls.lock().unwrap();
        assert!(calls[2].contains("Render probe failed"), "fix prompt should name the probe failure");
    }

    #[tokio::test]
    async fn probe_can_be_disabled() {
        let model = ScriptedModel::new(vec![Ok(ANALYSIS_OK.into()), Ok(UNBOUND.into())]);
        let settings = PipelineSettings {
            probe_before_save: false,
            ..PipelineSettings::default()
        };
        let state = orchestrator(model, Arc::new(MemoryStore::default()), settings)
            .run(LessonRequest::new("teach me fractions"))
            .await;
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.attempt, 0);
    }

    #[tokio::test]
    async fn zero_bound_acts_as_one() {
        let bad = "export default function LessonComponent() { eval('1'); return <div />; }";
        let model = ScriptedModel::new(vec![Ok(ANALYSIS_OK.into()), Ok(bad.into())]);
        let settings = PipelineSettings {
            bounded_retries: 0,
            ..PipelineSettings::default()
        };
        let state = orchestrator(model.clone(), Arc::new(MemoryStore::default()), settings)
            .run(LessonRequest::new("teach me fractions"))
            .await;
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.attempt, 1);
        assert_eq!(model.call_count(), 2, "no fix is attempted");
        assert!(
            state
                .failure_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("Validation failed after 1 attempts"))
        );
    }

    #[tokio::test]
    async fn phase_events_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(64);
        let model = ScriptedModel::new(vec![Ok(ANALYSIS_OK.into()), Ok(CLEAN.into())]);
        let state = orchestrator(model, Arc::new(MemoryStore::default()), PipelineSettings::default())
            .with_events(tx)
            .run(LessonRequest::new("teach me fractions"))
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(serde_json::from_str::<WsMessage>(&event).unwrap());
        }
        assert!(matches!(events.first(), Some(WsMessage::GenerationStarted { .. })));
        match events.last() {
            Some(WsMessage::GenerationFinished {
                run_id,
                phase,
                lesson_id,
                error,
            }) => {
                assert_eq!(run_id, &state.run_id);
                assert_eq!(*phase, Phase::Completed);
                assert!(lesson_id.is_some());
                assert!(error.is_none());
            }
            other => panic!("unexpected last event {other:?}"),
        }
        let phases: Vec<Phase> = events
            .iter()
            .filter_map(|e| match e {
                WsMessage::GenerationPhase { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Analyzed,
                Phase::Generated,
                Phase::Validated,
                Phase::Saved,
                Phase::Completed
            ]
        );
    }
}
