use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, Row, params, params_from_iter};
use uuid::Uuid;

use super::models::*;
use crate::errors::LessonStoreError;
use crate::pipeline::ModuleStore;

/// Async-safe handle to the lesson database.
///
/// Wraps `LessonDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<LessonDb>>,
}

impl DbHandle {
    pub fn new(db: LessonDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LessonDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| LessonStoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Fetch one lesson, distinguishing a missing id from a storage failure.
    pub async fn fetch(&self, id: &str) -> Result<LessonRecord, LessonStoreError> {
        let owned = id.to_string();
        match self.call(move |db| db.get_lesson(&owned)).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(LessonStoreError::NotFound { id: id.to_string() }),
            Err(e) => Err(LessonStoreError::Database(e)),
        }
    }
}

#[async_trait]
impl ModuleStore for DbHandle {
    async fn save(&self, lesson: NewLesson) -> Result<LessonRecord> {
        self.call(move |db| db.insert_lesson(&lesson)).await
    }
}

pub struct LessonDb {
    conn: Connection,
}

const LESSON_COLUMNS: &str =
    "id, title, prompt, source_text, owner_id, audience, tone, created_at";

fn lesson_from_row(row: &Row<'_>) -> rusqlite::Result<LessonRecord> {
    Ok(LessonRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        prompt: row.get(2)?,
        source_text: row.get(3)?,
        owner_id: row.get(4)?,
        audience: row.get(5)?,
        tone: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl LessonDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS lessons (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    source_text TEXT NOT NULL,
                    owner_id TEXT,
                    audience TEXT,
                    tone TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_lessons_owner ON lessons(owner_id);
                CREATE INDEX IF NOT EXISTS idx_lessons_created ON lessons(created_at);
                ",
            )
            .context("Failed to create lessons table")?;
        Ok(())
    }

    pub fn insert_lesson(&self, lesson: &NewLesson) -> Result<LessonRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO lessons (id, title, prompt, source_text, owner_id, audience, tone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    lesson.title,
                    lesson.prompt,
                    lesson.source_text,
                    lesson.owner_id,
                    lesson.audience,
                    lesson.tone,
                    created_at
                ],
            )
            .context("Failed to insert lesson")?;
        self.get_lesson(&id)?
            .context("Lesson not found after insert")
    }

    pub fn get_lesson(&self, id: &str) -> Result<Option<LessonRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"))
            .context("Failed to prepare get_lesson")?;
        let mut rows = stmt
            .query_map(params![id], lesson_from_row)
            .context("Failed to query lesson")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read lesson row")?)),
            None => Ok(None),
        }
    }

    pub fn list_lessons(&self, query: &LessonQuery) -> Result<Vec<LessonSummary>> {
        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(owner) = query.owner.as_deref().filter(|o| !o.is_empty()) {
            values.push(owner.to_string());
            conditions.push(format!("owner_id = ?{}", values.len()));
        }
        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            values.push(format!("%{}%", q.to_lowercase()));
            let n = values.len();
            conditions.push(format!("(lower(title) LIKE ?{n} OR lower(prompt) LIKE ?{n})"));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {LESSON_COLUMNS} FROM lessons {where_clause} ORDER BY {}",
            query.order_clause()
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_lessons")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), lesson_from_row)
            .context("Failed to query lessons")?;
        let mut lessons = Vec::new();
        for row in rows {
            lessons.push(row.context("Failed to read lesson row")?.into());
        }
        Ok(lessons)
    }

    pub fn delete_lesson(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM lessons WHERE id = ?1", params![id])
            .context("Failed to delete lesson")?;
        Ok(count > 0)
    }
}
