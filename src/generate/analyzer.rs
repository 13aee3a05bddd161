use anyhow::Result;
use serde::Deserialize;

use super::ModelService;
use crate::util::{extract_json_object, truncate_chars};

pub const DEFAULT_REJECTION_REASON: &str = "Not an educational topic";

const ANALYZER_SYSTEM_PROMPT: &str = r#"You decide whether a request describes a topic that can be taught as a short interactive lesson, and you give the lesson a title.

Respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "isValid": true | false,
  "title": "Short lesson title, 2-6 words, title case",
  "reason": "Why the request was rejected (only when isValid is false)"
}

Rules:
- Accept any learnable subject: academic topics, practical skills, concepts, history, science, languages, arts.
- Reject requests that are not a subject to learn: greetings, chit-chat, requests for opinions, harmful or unsafe content.
- The title names the subject itself, e.g. "teach me fractions" -> "Fractions".
"#;

/// Classification of an incoming lesson request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    Accepted { title: String },
    Rejected { reason: String },
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(rename = "isValid", alias = "is_valid")]
    is_valid: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl Analysis {
    /// Interpret a raw model reply. Never fails: an unparseable reply, or an accepted
    /// reply without a usable title, is accepted under the truncated request as title.
    pub fn from_reply(reply: &str, request: &str, title_max_chars: usize) -> Self {
        let fallback = || Analysis::Accepted {
            title: truncate_chars(request.trim(), title_max_chars),
        };

        let Some(json) = extract_json_object(reply) else {
            tracing::warn!("Analyzer reply contained no JSON object, using fallback title");
            return fallback();
        };
        let parsed: AnalysisReply = match serde_json::from_str(&json) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Analyzer reply had an unexpected shape, using fallback title");
                return fallback();
            }
        };

        if !parsed.is_valid {
            let reason = parsed
                .reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
            return Analysis::Rejected { reason };
        }

        match parsed.title.map(|t| t.trim().to_string()) {
            Some(title) if !title.is_empty() => Analysis::Accepted {
                title: truncate_chars(&title, title_max_chars),
            },
            _ => fallback(),
        }
    }
}

/// Classifies and titles a request with one model call.
pub struct PromptAnalyzer<'a> {
    model: &'a dyn ModelService,
    title_max_chars: usize,
}

impl<'a> PromptAnalyzer<'a> {
    pub fn new(model: &'a dyn ModelService, title_max_chars: usize) -> Self {
        Self {
            model,
            title_max_chars,
        }
    }

    /// Model-service errors propagate; malformed replies degrade to the fallback title.
    pub async fn analyze(&self, request: &str) -> Result<Analysis> {
        let reply = self.model.complete(ANALYZER_SYSTEM_PROMPT, request).await?;
        Ok(Analysis::from_reply(&reply, request, self.title_max_chars))
    }
}
