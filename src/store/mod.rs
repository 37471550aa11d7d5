//! Durable record store
//!
//! Four linked tables (problems, solutions, verifications, feedback) in a
//! SQLite database. The schema is created once at initialization and every
//! write is additive; correction is a new row, never an edit.

use crate::error::MentorError;
use crate::models::{
    FeedbackEntry, ParsedProblem, ProblemSummary, SessionIds, Solution, SolutionStep,
    StoreStats, StoredFeedback, StoredProblem, StoredSolution, StoredVerification,
    VerificationDraft, VerificationResult,
};
use crate::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Stamped into `PRAGMA user_version`; bump alongside a migration step.
const SCHEMA_VERSION: i64 = 1;

/// Number of leading characters used for lexical similarity matching.
const SIMILARITY_PREFIX_LEN: usize = 20;

/// Persistent store for problem-solving sessions.
///
/// Explicitly constructed and passed to its consumers; holds no global
/// state. SQLite's file locking provides the single-writer discipline while
/// the pool serves concurrent reads.
pub struct RecordStore {
    pool: SqlitePool,
    location: String,
}

impl RecordStore {
    /// Open (or create) a store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: path.display().to_string(),
        };
        store.init_schema().await?;

        info!(location = %store.location, "Record store opened");
        Ok(store)
    }

    /// Ephemeral in-memory store for tests and demos.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // One connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: ":memory:".to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all four tables once. Never drops existing data; the
    /// `user_version` pragma is the hook for future schema migrations.
    async fn init_schema(&self) -> Result<()> {
        let version: i64 = sqlx::query("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        if version > SCHEMA_VERSION {
            return Err(MentorError::StorageError(format!(
                "store at {} has schema version {}, this build supports {}",
                self.location, version, SCHEMA_VERSION
            )));
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS problems (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              original_input TEXT NOT NULL,
              problem_text TEXT NOT NULL,
              topic TEXT NOT NULL,
              variables TEXT NOT NULL,
              constraints TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS solutions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              problem_id INTEGER NOT NULL REFERENCES problems (id),
              steps TEXT NOT NULL,
              final_answer TEXT,
              formulas_used TEXT NOT NULL,
              method TEXT NOT NULL,
              solved_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verifications (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              solution_id INTEGER NOT NULL REFERENCES solutions (id),
              is_correct INTEGER NOT NULL,
              confidence REAL NOT NULL,
              issues TEXT NOT NULL,
              warnings TEXT NOT NULL,
              requires_human_review INTEGER NOT NULL,
              verified_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              solution_id INTEGER NOT NULL REFERENCES solutions (id),
              is_correct INTEGER NOT NULL,
              feedback_text TEXT NOT NULL,
              corrected_answer TEXT,
              given_by TEXT NOT NULL DEFAULT 'user',
              given_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        if version < SCHEMA_VERSION {
            sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    //
    // ================= Insertion =================
    //

    /// Persist a problem record; returns its assigned identity.
    pub async fn store_problem(&self, problem: &ParsedProblem) -> Result<i64> {
        let id = insert_problem(&self.pool, problem).await?;
        debug!(problem_id = id, topic = %problem.topic, "Stored problem");
        Ok(id)
    }

    /// Persist a solution keyed by its problem; returns its assigned identity.
    pub async fn store_solution(&self, problem_id: i64, solution: &Solution) -> Result<i64> {
        let id = insert_solution(&self.pool, problem_id, solution).await?;
        debug!(solution_id = id, problem_id, "Stored solution");
        Ok(id)
    }

    /// Normalize a loosely-shaped verification and insert it additively.
    ///
    /// Never drops or rewrites verification history for other solutions.
    pub async fn store_verification(
        &self,
        solution_id: i64,
        draft: VerificationDraft,
    ) -> Result<i64> {
        let record = draft.normalized();
        let id = insert_verification(&self.pool, solution_id, &record).await?;
        debug!(
            verification_id = id,
            solution_id,
            confidence = record.confidence,
            "Stored verification"
        );
        Ok(id)
    }

    /// Append a feedback row for a solution.
    pub async fn store_feedback(&self, solution_id: i64, entry: &FeedbackEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO feedback
              (solution_id, is_correct, feedback_text, corrected_answer, given_by, given_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(solution_id)
        .bind(entry.is_correct)
        .bind(&entry.feedback_text)
        .bind(&entry.corrected_answer)
        .bind(&entry.given_by)
        .bind(entry.given_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(feedback_id = id, solution_id, "Stored feedback");
        Ok(id)
    }

    /// Append user feedback against the most recent solution for a problem.
    pub async fn add_feedback(
        &self,
        problem_id: i64,
        is_correct: bool,
        feedback_text: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT id FROM solutions WHERE problem_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(problem_id)
        .fetch_optional(&self.pool)
        .await?;

        let solution_id: i64 = match row {
            Some(row) => row.try_get("id")?,
            None => {
                return Err(MentorError::ValidationError(format!(
                    "no solution stored for problem {}",
                    problem_id
                )))
            }
        };

        self.store_feedback(
            solution_id,
            &FeedbackEntry {
                is_correct,
                feedback_text: feedback_text.to_string(),
                corrected_answer: None,
                given_by: "user".to_string(),
                given_at: Utc::now(),
            },
        )
        .await
    }

    /// Persist one session's causal chain in a single transaction.
    ///
    /// Rolls back on any partial failure, so the store never holds an
    /// orphaned solution or verification.
    pub async fn store_session(
        &self,
        problem: &ParsedProblem,
        solution: &Solution,
        verification: &VerificationResult,
    ) -> Result<SessionIds> {
        let mut tx = self.pool.begin().await?;

        let problem_id = insert_problem(&mut *tx, problem).await?;
        let solution_id = insert_solution(&mut *tx, problem_id, solution).await?;
        let verification_id = insert_verification(&mut *tx, solution_id, verification).await?;

        tx.commit().await?;

        info!(
            problem_id,
            solution_id, verification_id, "Session persisted"
        );

        Ok(SessionIds {
            problem_id,
            solution_id,
            verification_id,
        })
    }

    //
    // ================= Queries =================
    //

    /// Lexical similarity lookup: problems whose text contains the first
    /// characters of the query, most recent first.
    pub async fn find_similar_problems(
        &self,
        text: &str,
        limit: i64,
    ) -> Result<Vec<StoredProblem>> {
        let prefix: String = text.chars().take(SIMILARITY_PREFIX_LEN).collect();
        let pattern = format!("%{}%", prefix);

        let rows = sqlx::query(
            r#"
            SELECT id, original_input, problem_text, topic, variables, constraints, created_at
            FROM problems
            WHERE problem_text LIKE ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(problem_from_row).collect()
    }

    /// Recent history: problems joined with their latest solution's answer.
    pub async fn recent_sessions(&self, limit: i64) -> Result<Vec<ProblemSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.problem_text, p.topic, p.created_at, s.final_answer
            FROM problems p
            LEFT JOIN solutions s ON s.id = (
                SELECT id FROM solutions
                WHERE problem_id = p.id
                ORDER BY id DESC
                LIMIT 1
            )
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(ProblemSummary {
                id: row.try_get("id")?,
                text: row.try_get("problem_text")?,
                topic: row.try_get("topic")?,
                created_at: row.try_get("created_at")?,
                final_answer: row.try_get("final_answer")?,
            });
        }
        Ok(summaries)
    }

    /// Aggregate statistics across the whole store.
    pub async fn stats(&self) -> Result<StoreStats> {
        let total_problems: i64 = sqlx::query("SELECT COUNT(*) AS n FROM problems")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        let correct_verifications: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM verifications WHERE is_correct = 1")
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        let topic_rows = sqlx::query(
            "SELECT topic, COUNT(*) AS n FROM problems GROUP BY topic ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut topics = HashMap::with_capacity(topic_rows.len());
        for row in topic_rows {
            let topic: String = row.try_get("topic")?;
            let count: i64 = row.try_get("n")?;
            topics.insert(topic, count);
        }

        let average_confidence: f64 =
            sqlx::query("SELECT AVG(confidence) AS avg FROM verifications")
                .fetch_one(&self.pool)
                .await?
                .try_get::<Option<f64>, _>("avg")?
                .unwrap_or(0.0);

        let positive_feedback: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM feedback WHERE is_correct = 1")
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        let negative_feedback: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM feedback WHERE is_correct = 0")
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        Ok(StoreStats {
            total_problems,
            correct_verifications,
            topics,
            average_confidence,
            positive_feedback,
            negative_feedback,
        })
    }

    //
    // ================= Retrieval =================
    //

    pub async fn problem(&self, id: i64) -> Result<Option<StoredProblem>> {
        let row = sqlx::query(
            r#"
            SELECT id, original_input, problem_text, topic, variables, constraints, created_at
            FROM problems WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(problem_from_row).transpose()
    }

    pub async fn solution(&self, id: i64) -> Result<Option<StoredSolution>> {
        let row = sqlx::query(
            r#"
            SELECT id, problem_id, steps, final_answer, formulas_used, method, solved_at
            FROM solutions WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let steps: Vec<SolutionStep> = serde_json::from_str(row.try_get("steps")?)?;
        let formulas_used: Vec<String> = serde_json::from_str(row.try_get("formulas_used")?)?;

        Ok(Some(StoredSolution {
            id: row.try_get("id")?,
            problem_id: row.try_get("problem_id")?,
            steps,
            final_answer: row.try_get("final_answer")?,
            formulas_used,
            method: row.try_get("method")?,
            solved_at: row.try_get("solved_at")?,
        }))
    }

    /// The verification that currently stands for a solution: the latest one.
    pub async fn latest_verification(
        &self,
        solution_id: i64,
    ) -> Result<Option<StoredVerification>> {
        let row = sqlx::query(
            r#"
            SELECT id, solution_id, is_correct, confidence, issues, warnings,
                   requires_human_review, verified_at
            FROM verifications
            WHERE solution_id = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(solution_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let issues: Vec<String> = serde_json::from_str(row.try_get("issues")?)?;
        let warnings: Vec<String> = serde_json::from_str(row.try_get("warnings")?)?;

        Ok(Some(StoredVerification {
            id: row.try_get("id")?,
            solution_id: row.try_get("solution_id")?,
            is_correct: row.try_get("is_correct")?,
            confidence: row.try_get("confidence")?,
            issues,
            warnings,
            requires_human_review: row.try_get("requires_human_review")?,
            verified_at: row.try_get("verified_at")?,
        }))
    }

    /// All feedback rows for a solution, oldest first.
    pub async fn feedback_for_solution(&self, solution_id: i64) -> Result<Vec<StoredFeedback>> {
        let rows = sqlx::query(
            r#"
            SELECT id, solution_id, is_correct, feedback_text, corrected_answer, given_by, given_at
            FROM feedback
            WHERE solution_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(solution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(StoredFeedback {
                id: row.try_get("id")?,
                solution_id: row.try_get("solution_id")?,
                is_correct: row.try_get("is_correct")?,
                feedback_text: row.try_get("feedback_text")?,
                corrected_answer: row.try_get("corrected_answer")?,
                given_by: row.try_get("given_by")?,
                given_at: row.try_get("given_at")?,
            });
        }
        Ok(entries)
    }
}

//
// ================= Insert helpers =================
//
// Generic over the executor so the same statements serve both direct pool
// writes and the transactional session path.

async fn insert_problem<'e, E>(executor: E, problem: &ParsedProblem) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let variables = serde_json::to_string(&problem.variables)?;
    let constraints = serde_json::to_string(&problem.constraints)?;

    let result = sqlx::query(
        r#"
        INSERT INTO problems
          (original_input, problem_text, topic, variables, constraints, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&problem.original_input)
    .bind(&problem.text)
    .bind(&problem.topic)
    .bind(&variables)
    .bind(&constraints)
    .bind(problem.parsed_at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_solution<'e, E>(executor: E, problem_id: i64, solution: &Solution) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let steps = serde_json::to_string(&solution.steps)?;
    let formulas = serde_json::to_string(&solution.formulas_used)?;
    let final_answer = solution.final_answer.as_ref().map(|a| a.to_string());

    let result = sqlx::query(
        r#"
        INSERT INTO solutions
          (problem_id, steps, final_answer, formulas_used, method, solved_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(problem_id)
    .bind(&steps)
    .bind(&final_answer)
    .bind(&formulas)
    .bind(&solution.method)
    .bind(solution.solved_at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_verification<'e, E>(
    executor: E,
    solution_id: i64,
    record: &VerificationResult,
) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let issues = serde_json::to_string(&record.issues)?;
    let warnings = serde_json::to_string(&record.warnings)?;

    let result = sqlx::query(
        r#"
        INSERT INTO verifications
          (solution_id, is_correct, confidence, issues, warnings,
           requires_human_review, verified_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(solution_id)
    .bind(record.is_correct)
    .bind(record.confidence.clamp(0.0, 1.0))
    .bind(&issues)
    .bind(&warnings)
    .bind(record.requires_human_review)
    .bind(record.verified_at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

fn problem_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredProblem> {
    let variables: Vec<String> = serde_json::from_str(row.try_get("variables")?)?;
    let constraints: Vec<String> = serde_json::from_str(row.try_get("constraints")?)?;

    Ok(StoredProblem {
        id: row.try_get("id")?,
        original_input: row.try_get("original_input")?,
        text: row.try_get("problem_text")?,
        topic: row.try_get("topic")?,
        variables,
        constraints,
        created_at: row.try_get("created_at")?,
    })
}

//
// ================= Tests =================
//
