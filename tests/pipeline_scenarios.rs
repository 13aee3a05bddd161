//! End-to-end generation runs against scripted model replies.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use lessonforge::generate::ModelService;
use lessonforge::lessons::{DbHandle, LessonDb, LessonQuery, LessonRecord, NewLesson};
use lessonforge::pipeline::{
    LessonRequest, ModuleStore, Orchestrator, Phase, PipelineSettings, max_stages,
};
use lessonforge::validator::{ViolationCode, validate_source};

const FRACTIONS_ANALYSIS: &str = r#"Sure. {"isValid": true, "title": "Fractions"}"#;

const HOVER_LESSON: &str = r#"Here is your lesson:
```tsx
"use client";
import React, { useState } from 'react';

export default function LessonComponent() {
  const [parts, setParts] = useState(4);
  return (
    <div className="p-6 bg-pink-200">
      <h1 className="text-2xl">Fractions</h1>
      <p>One of {parts} equal parts is 1/{parts}.</p>
      <button className="bg-blue-200 hover:bg-blue-300" onClick={() => setParts(parts + 1)}>Split again</button>
    </div>
  );
}
```"#;

const FIXED_LESSON: &str = r#"```tsx
"use client";
import React, { useState } from 'react';

export default function LessonComponent() {
  const [parts, setParts] = useState(4);
  return (
    <div className="p-6 bg-pink-200">
      <h1 className="text-2xl">Fractions</h1>
      <p>One of {parts} equal parts is 1/{parts}.</p>
      <button className="bg-blue-200" onClick={() => setParts(parts + 1)}>Split again</button>
    </div>
  );
}
```"#;

const EVAL_LESSON: &str = r#"```tsx
import React from 'react';
export default function LessonComponent() {
  const answer = eval("1 / 2");
  return <div className="bg-green-200">{answer}</div>;
}
```"#;

const LODASH_LESSON: &str = r#"```tsx
import React from 'react';
import _ from 'lodash';
export default function LessonComponent() {
  return <div className="bg-green-200">{_.capitalize("halves")}</div>;
}
```"#;

/// Replies in order; records the system instruction of every call.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    /// Reply used once the script runs out.
    repeat: Option<String>,
    systems: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Self::repeating(replies, None)
    }

    fn repeating(replies: &[&str], repeat: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            repeat: repeat.map(str::to_string),
            systems: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.systems.lock().unwrap().len()
    }

    fn system(&self, index: usize) -> String {
        self.systems.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(&self, system: &str, _user: &str) -> Result<String> {
        self.systems.lock().unwrap().push(system.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| anyhow::anyhow!("unexpected model call"))
    }
}

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<NewLesson>>,
}

#[async_trait]
impl ModuleStore for RecordingStore {
    async fn save(&self, lesson: NewLesson) -> Result<LessonRecord> {
        self.saved.lock().unwrap().push(lesson.clone());
        Ok(LessonRecord {
            id: "lesson-1".into(),
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

struct FailingStore;

#[async_trait]
impl ModuleStore for FailingStore {
    async fn save(&self, _lesson: NewLesson) -> Result<LessonRecord> {
        Err(anyhow::anyhow!("disk full"))
    }
}

fn run_with(
    model: Arc<ScriptedModel>,
    store: Arc<dyn ModuleStore>,
    settings: PipelineSettings,
) -> Orchestrator {
    Orchestrator::new(model, store, settings)
}

#[tokio::test]
async fn hover_class_is_fixed_and_lesson_saved() {
    let model = ScriptedModel::new(&[FRACTIONS_ANALYSIS, HOVER_LESSON, FIXED_LESSON]);
    let db = DbHandle::new(LessonDb::new_in_memory().unwrap());

    let state = run_with(model.clone(), Arc::new(db.clone()), PipelineSettings::default())
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.title, "Fractions");
    assert_eq!(state.attempt, 1);
    assert!(state.accepted);
    assert!(state.violations.is_empty());
    assert_eq!(model.calls(), 3);
    assert!(
        model
            .system(2)
            .contains("Hover styles are not allowed: hover:bg-blue-300"),
        "the fixer sees the flagged class"
    );

    let id = state.record_id.clone().expect("saved lesson id");
    let record = db.fetch(&id).await.unwrap();
    assert_eq!(record.title, "Fractions");
    assert_eq!(record.prompt, "teach me fractions");
    assert!(!record.source_text.contains("hover:"));
    assert!(validate_source(&record.source_text).accepted);

    let listed = db
        .call(|db| db.list_lessons(&LessonQuery::default()))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn off_topic_request_is_rejected_without_generation() {
    let model = ScriptedModel::new(&[
        r#"{"isValid": false, "reason": "Greetings are not a learning topic"}"#,
    ]);
    let store = Arc::new(RecordingStore::default());

    let state = run_with(model.clone(), store.clone(), PipelineSettings::default())
        .run(LessonRequest::new("hi, how are you?"))
        .await;

    assert_eq!(state.phase, Phase::Rejected);
    assert_eq!(
        state.failure_reason.as_deref(),
        Some("Greetings are not a learning topic")
    );
    assert_eq!(model.calls(), 1, "no generation call after rejection");
    assert!(state.source_text.is_empty());
    assert!(store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn persistent_eval_exhausts_the_retry_bound() {
    let model = ScriptedModel::repeating(&[FRACTIONS_ANALYSIS], Some(EVAL_LESSON));
    let store = Arc::new(RecordingStore::default());
    let settings = PipelineSettings::default();
    let bound = settings.bounded_retries;

    let state = run_with(model.clone(), store.clone(), settings)
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.attempt, bound);
    assert!(!state.accepted);
    assert!(state.record_id.is_none());
    let reason = state.failure_reason.clone().unwrap();
    assert!(reason.starts_with("Validation failed after 3 attempts"), "{reason}");
    assert!(reason.contains("eval"), "{reason}");
    // analyze + generate + two fixes
    assert_eq!(model.calls(), 4);
    assert!(state.stages_run <= max_stages(bound));
    assert!(store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn store_failure_is_surfaced() {
    let model = ScriptedModel::new(&[FRACTIONS_ANALYSIS, FIXED_LESSON]);

    let state = run_with(model, Arc::new(FailingStore), PipelineSettings::default())
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.failure_reason.as_deref(), Some("disk full"));
    assert!(state.record_id.is_none());
    assert!(state.accepted, "the candidate itself was fine");
}

#[tokio::test]
async fn disallowed_import_is_never_saved_unfixed() {
    let model = ScriptedModel::repeating(&[FRACTIONS_ANALYSIS], Some(LODASH_LESSON));
    let store = Arc::new(RecordingStore::default());

    let state = run_with(model.clone(), store.clone(), PipelineSettings::default())
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Failed);
    assert!(
        state
            .violation_messages()
            .contains(&"Import not allowed: lodash".to_string())
    );
    assert!(store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disallowed_import_saved_once_fixed() {
    let model = ScriptedModel::new(&[FRACTIONS_ANALYSIS, LODASH_LESSON, FIXED_LESSON]);
    let store = Arc::new(RecordingStore::default());

    let state = run_with(model.clone(), store.clone(), PipelineSettings::default())
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Completed);
    assert!(model.system(2).contains("Import not allowed: lodash"));
    let saved = store.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert!(!saved[0].source_text.contains("lodash"));
}

#[tokio::test]
async fn type_only_import_is_accepted_without_a_fix() {
    let typed = FIXED_LESSON.replacen(
        "import React, { useState } from 'react';",
        "import React, { useState } from 'react';\nimport type { Part } from './types';",
        1,
    );
    let model = ScriptedModel::new(&[FRACTIONS_ANALYSIS, typed.as_str()]);
    let store = Arc::new(RecordingStore::default());

    let state = run_with(model.clone(), store.clone(), PipelineSettings::default())
        .run(LessonRequest::new("teach me fractions"))
        .await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.attempt, 0);
    assert!(state.accepted);
    assert!(state.violations.is_empty());
    assert_eq!(model.calls(), 2, "no fixer call");
    assert_eq!(state.diagnostics[0].code, ViolationCode::MissingTypeDeclaration);
    assert_eq!(store.saved.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn retry_bound_holds_for_every_setting() {
    for bound in 1..=5u32 {
        let model = ScriptedModel::repeating(&[FRACTIONS_ANALYSIS], Some(EVAL_LESSON));
        let settings = PipelineSettings {
            bounded_retries: bound,
            ..PipelineSettings::default()
        };
        let state = run_with(model.clone(), Arc::new(RecordingStore::default()), settings)
            .run(LessonRequest::new("teach me fractions"))
            .await;

        assert_eq!(state.phase, Phase::Failed, "bound {bound}");
        assert_eq!(state.attempt, bound, "bound {bound}");
        assert!(state.stages_run <= bound + 2, "bound {bound}");
        assert_eq!(model.calls() as u32, bound + 1, "bound {bound}");
    }
}

#[tokio::test]
async fn identical_scripts_produce_identical_runs() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let model = ScriptedModel::new(&[FRACTIONS_ANALYSIS, HOVER_LESSON, FIXED_LESSON]);
        let state = run_with(model, Arc::new(RecordingStore::default()), PipelineSettings::default())
            .run(LessonRequest::new("teach me fractions"))
            .await;
        outcomes.push((state.phase, state.attempt, state.stages_run, state.source_text));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}
