use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A persisted lesson module. Created once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonRecord {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub source_text: String,
    pub owner_id: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub created_at: String,
}

/// Fields supplied by the pipeline; id and timestamp are assigned by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewLesson {
    pub title: String,
    pub prompt: String,
    pub source_text: String,
    pub owner_id: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
}

/// Listing entry without the module source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub owner_id: Option<String>,
    pub created_at: String,
}

impl From<LessonRecord> for LessonSummary {
    fn from(record: LessonRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            prompt: record.prompt,
            owner_id: record.owner_id,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LessonSort {
    #[default]
    Newest,
    Oldest,
}

impl LessonSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }

    fn order_clause(&self) -> &'static str {
        match self {
            Self::Newest => "created_at DESC, rowid DESC",
            Self::Oldest => "created_at ASC, rowid ASC",
        }
    }
}

impl FromStr for LessonSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            _ => Err(format!("Invalid sort: {}", s)),
        }
    }
}

/// Dashboard listing filter: owner, case-insensitive title/prompt search, ordering.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LessonQuery {
    pub owner: Option<String>,
    pub q: Option<String>,
    #[serde(default)]
    pub sort: LessonSort,
}

impl LessonQuery {
    pub(crate) fn order_clause(&self) -> &'static str {
        self.sort.order_clause()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lesson_sort_roundtrip() {
        for s in &["newest", "oldest"] {
            let parsed: LessonSort = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("alphabetical".parse::<LessonSort>().is_err());
        assert_eq!(LessonSort::default(), LessonSort::Newest);
    }

    #[test]
    fn test_summary_drops_source() {
        let record = LessonRecord {
            id: "a".into(),
            title: "Fractions".into(),
            prompt: "teach me fractions".into(),
            source_text: "export default function L() {}".into(),
            owner_id: Some("u1".into()),
            audience: None,
            tone: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let summary = LessonSummary::from(record);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("source_text").is_none());
        assert_eq!(json["title"], "Fractions");
    }

    #[test]
    fn test_query_deserializes_sort() {
        let query: LessonQuery =
            serde_json::from_value(serde_json::json!({ "sort": "oldest", "q": "frac" })).unwrap();
        assert_eq!(query.sort, LessonSort::Oldest);
        assert_eq!(query.q.as_deref(), Some("frac"));
        assert!(query.owner.is_none());
    }
}
