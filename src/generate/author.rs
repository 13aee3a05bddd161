//! Authoring and repair of lesson components.

use anyhow::Result;

use super::{ModelService, extract_component_code};
use crate::sandbox::scope::CHART_REGISTRY;
use crate::validator::{ALLOWED_NAMESPACES, Violation};

/// Hints that shape a generated lesson.
#[derive(Debug, Clone, Default)]
pub struct AuthoringHints<'a> {
    pub audience: Option<&'a str>,
    pub tone: Option<&'a str>,
}

const PALETTE: &str = "bg-blue-200, bg-pink-200, bg-green-200, bg-yellow-200, bg-purple-200, bg-orange-200";

/// System instruction for the first candidate.
pub fn generation_instruction(title: &str, hints: &AuthoringHints<'_>) -> String {
    let mut prompt = format!(
        r#"You write a single self-contained React component in TypeScript (TSX) that teaches one topic as an interactive lesson.

LESSON TOPIC: {title}

The lesson MUST contain, in this order:
1. A title header naming the topic.
2. A descriptive section explaining the core idea in plain language.
3. A "Where you'll see this" section with real-world uses.
4. At least one animated element using Tailwind animation classes (animate-bounce, animate-pulse, animate-spin).
5. An interactive element specific to this topic with visual feedback that updates live as the learner changes inputs.
6. A short quiz (3 questions) that tells the learner immediately whether each answer is correct.

Imports:
- Only these modules may be imported: {modules}.
- Import hooks by name: import React, {{ useState }} from 'react';
- Icons come from lucide-react, charts from recharts, date formatting from date-fns.
- From recharts use only: {charts}.
- From date-fns use only format; do any other date arithmetic inline.
- Dynamic import() and require() are not allowed.

Structure:
- Start the file with "use client";
- Export the component exactly as: export default function LessonComponent()
- Keep all data (quiz questions, examples) in constants or useState inside the file.

Styling:
- Use Tailwind CSS classes for all styling.
- Use soft pastel backgrounds from this palette only: {PALETTE}.
- NEVER use hover-triggered classes (hover:, group-hover:, peer-hover:).
- Buttons must NEVER have a white background.

Forbidden (the component is rejected if present):
- eval, new Function, string arguments to setTimeout or setInterval
- dangerouslySetInnerHTML, innerHTML, outerHTML, insertAdjacentHTML
- __proto__, constructor[...], Object.setPrototypeOf, prototype assignment
- document.write
- <script>, <iframe>, <form> elements, links or images pointing at URLs
"#,
        modules = ALLOWED_NAMESPACES.join(", "),
        charts = CHART_REGISTRY.join(", "),
    );

    if let Some(audience) = hints.audience.filter(|a| !a.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nAudience: {audience}. Pitch vocabulary, examples and quiz difficulty at this audience.\n"
        ));
    }
    if let Some(tone) = hints.tone.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("\nTone: write all explanatory text in a {tone} tone.\n"));
    }

    prompt.push_str("\nReturn ONLY the complete component inside one ```tsx code block.\n");
    prompt
}

/// System instruction for a targeted repair.
pub fn fix_instruction(source: &str, violations: &[Violation]) -> String {
    let listed = violations
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You repair a React/TypeScript lesson component that failed an automated policy check.

Rules:
1. Fix ONLY the problems listed below. Keep everything else exactly as it is.
2. Make the smallest possible edits. Do not rewrite working parts or change the lesson content.
3. Only these modules may be imported: {modules}. Replace anything else with plain React code.
4. Remove every hover-triggered class (hover:, group-hover:, peer-hover:).
5. Any button with bg-white gets a pastel background instead (for example bg-blue-200).
6. Keep "export default function LessonComponent()".

PROBLEMS TO FIX:
{listed}

CURRENT CODE:
```tsx
{source}
```

Return ONLY the corrected component inside one ```tsx code block.
"#,
        modules = ALLOWED_NAMESPACES.join(", "),
    )
}

/// Produces the first candidate for an analyzed request.
pub struct CodeGenerator<'a> {
    model: &'a dyn ModelService,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(model: &'a dyn ModelService) -> Self {
        Self { model }
    }

    pub async fn generate(
        &self,
        title: &str,
        request: &str,
        hints: &AuthoringHints<'_>,
    ) -> Result<String> {
        let system = generation_instruction(title, hints);
        let user = format!("Create an interactive lesson for: {request}");
        tracing::debug!(system_chars = system.len(), "Requesting first candidate");
        let reply = self.model.complete(&system, &user).await?;
        Ok(extract_component_code(&reply))
    }
}

/// Patches a candidate against its actionable violations.
pub struct CodeFixer<'a> {
    model: &'a dyn ModelService,
}

impl<'a> CodeFixer<'a> {
    pub fn new(model: &'a dyn ModelService) -> Self {
        Self { model }
    }

    pub async fn fix(&self, source: &str, actionable: &[Violation]) -> Result<String> {
        let system = fix_instruction(source, actionable);
        tracing::debug!(
            violations = actionable.len(),
            system_chars = system.len(),
            "Requesting targeted fix"
        );
        let reply = self
            .model
            .complete(&system, "Fix the listed problems in the code.")
            .await?;
        Ok(extract_component_code(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ViolationCode;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ModelService for RecordingModel {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok("```tsx\nexport default function LessonComponent() { return <div />; }\n```".into())
        }
    }

    #[test]
    fn generation_instruction_names_topic_and_rules() {
        let prompt = generation_instruction("Fractions", &AuthoringHints::default());
        assert!(prompt.contains("LESSON TOPIC: Fractions"));
        assert!(prompt.contains("export default function LessonComponent()"));
        assert!(prompt.contains("react, lucide-react, recharts, date-fns"));
        assert!(prompt.contains("bg-blue-200"));
        assert!(prompt.contains("From recharts use only: Area, AreaChart"));
        assert!(prompt.contains("From date-fns use only format"));
        assert!(!prompt.contains("Audience:"));
    }

    #[test]
    fn hints_are_woven_in() {
        let hints = AuthoringHints {
            audience: Some("8 year olds"),
            tone: Some("playful"),
        };
        let prompt = generation_instruction("Volcanoes", &hints);
        assert!(prompt.contains("Audience: 8 year olds"));
        assert!(prompt.contains("playful tone"));
    }

    #[test]
    fn blank_hints_are_ignored() {
        let hints = AuthoringHints {
            audience: Some("  "),
            tone: None,
        };
        assert!(!generation_instruction("X", &hints).contains("Audience:"));
    }

    #[test]
    fn fix_instruction_lists_violations_and_code() {
        let violations = vec![Violation::new(
            ViolationCode::DisallowedStyling,
            "Hover styles are not allowed: hover:bg-blue-300",
        )];
        let prompt = fix_instruction("const a = 1;", &violations);
        assert!(prompt.contains("- Hover styles are not allowed: hover:bg-blue-300"));
        assert!(prompt.contains("```tsx\nconst a = 1;\n```"));
    }

    #[tokio::test]
    async fn generator_extracts_code_from_reply() {
        let model = RecordingModel::default();
        let code = CodeGenerator::new(&model)
            .generate("Fractions", "teach me fractions", &AuthoringHints::default())
            .await
            .unwrap();
        assert_eq!(
            code,
            "export default function LessonComponent() { return <div />; }"
        );
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].1, "Create an interactive lesson for: teach me fractions");
    }

    #[tokio::test]
    async fn fixer_sends_current_source() {
        let model = RecordingModel::default();
        let violation = Violation::new(ViolationCode::BlockedCapability, "eval() is not allowed");
        CodeFixer::new(&model)
            .fix("eval('1')", &[violation])
            .await
            .unwrap();
        let calls = model.calls.lock().unwrap();
        assert!(calls[0].0.contains("eval('1')"));
        assert!(calls[0].0.contains("- eval() is not allowed"));
    }
}
