//! Durable per-learner progress and assessment state.
//!
//! Backed by SQLite (WAL). Every mutation runs inside a single transaction so
//! a concurrent reader never observes a partial record, and mutations for the
//! same learner are serialized through a per-user async lock; different
//! learners never contend. A write that cannot commit surfaces the error
//! instead of acknowledging success.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::{
    step_id, AssessmentRecord, CatalogSnapshot, CourseProgress, CourseStructure, NextPosition,
    StepType,
};

pub struct ProgressStore {
    pool: SqlitePool,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProgressStore {
    /// Open (and create if missing) the progress database. Idempotent.
    pub async fn open(config: &Config) -> Result<Self, EngineError> {
        Self::open_at(&config.progress.db_path).await
    }

    pub async fn open_at(db_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::InvalidRecord(format!("cannot create db dir: {}", e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(EngineError::Storage)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self {
            pool,
            locks: StdMutex::new(HashMap::new()),
        })
    }

    /// Per-user mutual exclusion handle. The outer map lock is held only for
    /// the lookup, never across awaits. Entries with no mutation in flight
    /// (strong count 1, map's own reference) are swept on each lookup so the
    /// map does not grow with every user id ever seen.
    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch the learner's record, creating a zero-value one on first access.
    pub async fn get_or_create(&self, user_id: &str) -> Result<CourseProgress, EngineError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, user_id, Utc::now()).await?;
        tx.commit().await?;

        self.load(user_id).await
    }

    /// Enroll the learner in a course, positioning them at its first step.
    pub async fn start_course(
        &self,
        user_id: &str,
        course: &CourseStructure,
    ) -> Result<CourseProgress, EngineError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let first_module = course.modules.first().map(|m| m.module_id.clone());
        let first_step = first_module.as_ref().map(|_| StepType::Intro);

        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, user_id, now).await?;
        sqlx::query(
            r#"
            UPDATE progress
            SET current_course_key = ?, current_module_id = ?, current_step_type = ?,
                last_activity_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(&course.course_key)
        .bind(&first_module)
        .bind(first_step.map(|s| s.as_str()))
        .bind(now.timestamp())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(user = user_id, course = %course.course_key, "course started");
        self.load(user_id).await
    }

    /// Record a completed step. Idempotent: re-completing an already-completed
    /// step changes nothing except `last_activity_at`.
    pub async fn apply_step_completion(
        &self,
        user_id: &str,
        step: &str,
    ) -> Result<CourseProgress, EngineError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, user_id, now).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO completed_steps (user_id, step_id, completed_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(step)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE progress SET last_activity_at = ? WHERE user_id = ?")
            .bind(now.timestamp())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.load(user_id).await
    }

    /// Append an assessment record and move the module's current score to the
    /// latest submission (not the best).
    pub async fn apply_assessment_result(
        &self,
        user_id: &str,
        record: &AssessmentRecord,
    ) -> Result<CourseProgress, EngineError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        ensure_record(&mut tx, user_id, now).await?;
        sqlx::query(
            r#"
            INSERT INTO assessment_records (id, user_id, module_id, raw_answers, score, feedback_summary, graded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(user_id)
        .bind(&record.module_id)
        .bind(record.raw_answers.to_string())
        .bind(record.score)
        .bind(&record.feedback_summary)
        .bind(record.graded_at.timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO module_scores (user_id, module_id, score, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, module_id) DO UPDATE SET
                score = excluded.score, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&record.module_id)
        .bind(record.score)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE progress SET last_activity_at = ? WHERE user_id = ?")
            .bind(now.timestamp())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(user = user_id, module = %record.module_id, score = record.score, "assessment recorded");
        self.load(user_id).await
    }

    /// Move the learner to the next position in their current course's
    /// module/step ordering, or report completion.
    pub async fn advance(
        &self,
        user_id: &str,
        catalog: &CatalogSnapshot,
    ) -> Result<NextPosition, EngineError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let progress = self.load(user_id).await?;
        let course_key = progress
            .current_course_key
            .as_deref()
            .ok_or_else(|| EngineError::NotEnrolled(user_id.to_string()))?;
        let course = catalog
            .course(course_key)
            .ok_or_else(|| EngineError::NotFound(format!("course '{}'", course_key)))?;

        // Flattened (module, step) sequence in catalog order
        let positions: Vec<(String, StepType)> = course
            .modules
            .iter()
            .flat_map(|m| StepType::ALL.map(|s| (m.module_id.clone(), s)))
            .collect();
        if positions.is_empty() {
            return Ok(NextPosition::Complete);
        }

        let next = match (&progress.current_module_id, progress.current_step_type) {
            (Some(module_id), Some(step_type)) => {
                let at = positions
                    .iter()
                    .position(|(m, s)| m == module_id && *s == step_type);
                match at {
                    Some(i) if i + 1 < positions.len() => Some(positions[i + 1].clone()),
                    Some(_) => None,
                    // Position refers to a module no longer in the catalog:
                    // restart at the beginning rather than fail
                    None => Some(positions[0].clone()),
                }
            }
            _ => Some(positions[0].clone()),
        };

        match next {
            None => Ok(NextPosition::Complete),
            Some((module_id, step_type)) => {
                let now = Utc::now();
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    r#"
                    UPDATE progress
                    SET current_module_id = ?, current_step_type = ?, last_activity_at = ?
                    WHERE user_id = ?
                    "#,
                )
                .bind(&module_id)
                .bind(step_type.as_str())
                .bind(now.timestamp())
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(NextPosition::Step {
                    module_id,
                    step_type,
                })
            }
        }
    }

    /// Append-only audit trail in insertion order, oldest first. Ordered by
    /// the monotonic `seq` column; `graded_at` has second granularity, so two
    /// submissions can share a timestamp.
    pub async fn assessment_history(
        &self,
        user_id: &str,
        module_id: Option<&str>,
    ) -> Result<Vec<AssessmentRecord>, EngineError> {
        let rows = match module_id {
            Some(module) => {
                sqlx::query(
                    r#"
                    SELECT id, module_id, raw_answers, score, feedback_summary, graded_at
                    FROM assessment_records
                    WHERE user_id = ? AND module_id = ?
                    ORDER BY seq ASC
                    "#,
                )
                .bind(user_id)
                .bind(module)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, module_id, raw_answers, score, feedback_summary, graded_at
                    FROM assessment_records
                    WHERE user_id = ?
                    ORDER BY seq ASC
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                let raw: String = row.get("raw_answers");
                let graded_at: i64 = row.get("graded_at");
                Ok(AssessmentRecord {
                    id: row.get("id"),
                    module_id: row.get("module_id"),
                    raw_answers: serde_json::from_str(&raw)
                        .map_err(|e| EngineError::InvalidRecord(format!("raw_answers: {}", e)))?,
                    score: row.get("score"),
                    feedback_summary: row.get("feedback_summary"),
                    graded_at: parse_ts(graded_at)?,
                })
            })
            .collect()
    }

    /// Read the full learner record. Fails with `NotFound` for unknown users;
    /// use [`get_or_create`](Self::get_or_create) when implicit creation is
    /// wanted.
    pub async fn load(&self, user_id: &str) -> Result<CourseProgress, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, current_course_key, current_module_id, current_step_type,
                   started_at, last_activity_at
            FROM progress WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("progress for user '{}'", user_id)))?;

        let step_rows =
            sqlx::query("SELECT step_id FROM completed_steps WHERE user_id = ? ORDER BY step_id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        let completed_steps = step_rows
            .iter()
            .map(|r| r.get::<String, _>("step_id"))
            .collect();

        let score_rows = sqlx::query(
            "SELECT module_id, score FROM module_scores WHERE user_id = ? ORDER BY module_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let assessment_scores = score_rows
            .iter()
            .map(|r| (r.get::<String, _>("module_id"), r.get::<f64, _>("score")))
            .collect();

        let current_step_type = row
            .get::<Option<String>, _>("current_step_type")
            .map(|s| {
                StepType::parse(&s)
                    .ok_or_else(|| EngineError::InvalidRecord(format!("step type '{}'", s)))
            })
            .transpose()?;

        Ok(CourseProgress {
            user_id: row.get("user_id"),
            current_course_key: row.get("current_course_key"),
            current_module_id: row.get("current_module_id"),
            current_step_type,
            completed_steps,
            assessment_scores,
            started_at: parse_ts(row.get("started_at"))?,
            last_activity_at: parse_ts(row.get("last_activity_at"))?,
        })
    }
}

async fn ensure_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO progress (user_id, started_at, last_activity_at) VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(now.timestamp())
    .bind(now.timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_ts(ts: i64) -> Result<DateTime<Utc>, EngineError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| EngineError::InvalidRecord(format!("timestamp {}", ts)))
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS progress (
            user_id TEXT PRIMARY KEY,
            current_course_key TEXT,
            current_module_id TEXT,
            current_step_type TEXT,
            started_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completed_steps (
            user_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            completed_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, step_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS module_scores (
            user_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            score REAL NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, module_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessment_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            raw_answers TEXT NOT NULL,
            score REAL NOT NULL,
            feedback_summary TEXT,
            graded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assessment_user_module ON assessment_records(user_id, module_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Build one canonical assessment record from a graded submission.
pub fn new_assessment_record(
    module_id: &str,
    raw_answers: serde_json::Value,
    score: f64,
    feedback_summary: Option<String>,
) -> AssessmentRecord {
    AssessmentRecord {
        id: uuid::Uuid::new_v4().to_string(),
        module_id: module_id.to_string(),
        raw_answers,
        score,
        feedback_summary,
        graded_at: Utc::now(),
    }
}
