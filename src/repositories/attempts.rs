use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::TestAttempt;
use crate::repositories::answers::{fetch_scoring_rows, write_answer, ScoreFn};
use crate::repositories::{acquire_attempt_lock, NewAnswer, PgRepository, ScoringRow, StoreResult};

const COLUMNS: &str = "id, test_id, student_id, start_time, end_time, completed, score, scored_at";

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) student_id: String,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) enum AttemptInsert {
    Created(TestAttempt),
    /// The (test, student) pair already had an attempt.
    Existing(TestAttempt),
}

#[async_trait]
pub(crate) trait AttemptRepository: Send + Sync {
    async fn insert_attempt(&self, attempt: NewAttempt) -> StoreResult<AttemptInsert>;
    async fn find_attempt(&self, test_id: &str, student_id: &str)
        -> StoreResult<Option<TestAttempt>>;
    /// Applies `answers` and marks the attempt completed with `end_time`.
    /// Returns `None` if someone else completed it first; nothing is written then.
    async fn close_attempt(
        &self,
        attempt: &TestAttempt,
        end_time: PrimitiveDateTime,
        answers: Vec<NewAnswer>,
    ) -> StoreResult<Option<TestAttempt>>;
    /// Re-reads the attempt's scoring rows under the attempt lock and stores
    /// `score_of(rows)`, so concurrent settles cannot persist a stale total.
    /// Returns the rows that were scored.
    async fn record_score(
        &self,
        attempt: &TestAttempt,
        score_of: &ScoreFn,
        scored_at: PrimitiveDateTime,
    ) -> StoreResult<Vec<ScoringRow>>;
    async fn list_finished_attempts(&self, test_id: &str) -> StoreResult<Vec<TestAttempt>>;
    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<TestAttempt>>;
}

#[async_trait]
impl AttemptRepository for PgRepository {
    async fn insert_attempt(&self, attempt: NewAttempt) -> StoreResult<AttemptInsert> {
        let mut tx = self.pool().begin().await?;
        acquire_attempt_lock(&mut *tx, &attempt.test_id, &attempt.student_id).await?;

        let created = sqlx::query_as::<_, TestAttempt>(&format!(
            "INSERT INTO test_attempts (id, test_id, student_id, start_time, end_time, completed)
             VALUES ($1,$2,$3,$4,$5,FALSE)
             ON CONFLICT ON CONSTRAINT uq_test_attempts_test_student DO NOTHING
             RETURNING {COLUMNS}"
        ))
        .bind(&attempt.id)
        .bind(&attempt.test_id)
        .bind(&attempt.student_id)
        .bind(attempt.start_time)
        .bind(attempt.end_time)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match created {
            Some(row) => AttemptInsert::Created(row),
            None => {
                let existing = sqlx::query_as::<_, TestAttempt>(&format!(
                    "SELECT {COLUMNS} FROM test_attempts WHERE test_id = $1 AND student_id = $2"
                ))
                .bind(&attempt.test_id)
                .bind(&attempt.student_id)
                .fetch_one(&mut *tx)
                .await?;
                AttemptInsert::Existing(existing)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn find_attempt(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<TestAttempt>> {
        let attempt = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts WHERE test_id = $1 AND student_id = $2"
        ))
        .bind(test_id)
        .bind(student_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(attempt)
    }

    async fn close_attempt(
        &self,
        attempt: &TestAttempt,
        end_time: PrimitiveDateTime,
        answers: Vec<NewAnswer>,
    ) -> StoreResult<Option<TestAttempt>> {
        let mut tx = self.pool().begin().await?;
        acquire_attempt_lock(&mut *tx, &attempt.test_id, &attempt.student_id).await?;

        let closed = sqlx::query_as::<_, TestAttempt>(&format!(
            "UPDATE test_attempts SET completed = TRUE, end_time = $1
             WHERE id = $2 AND NOT completed
             RETURNING {COLUMNS}"
        ))
        .bind(end_time)
        .bind(&attempt.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(closed) = closed else {
            tx.rollback().await?;
            return Ok(None);
        };

        for answer in &answers {
            write_answer(&mut *tx, answer).await?;
        }

        tx.commit().await?;
        Ok(Some(closed))
    }

    async fn record_score(
        &self,
        attempt: &TestAttempt,
        score_of: &ScoreFn,
        scored_at: PrimitiveDateTime,
    ) -> StoreResult<Vec<ScoringRow>> {
        let mut tx = self.pool().begin().await?;
        acquire_attempt_lock(&mut *tx, &attempt.test_id, &attempt.student_id).await?;

        let rows = fetch_scoring_rows(&mut *tx, &attempt.test_id, &attempt.student_id).await?;
        sqlx::query("UPDATE test_attempts SET score = $1, scored_at = $2 WHERE id = $3")
            .bind(score_of(&rows))
            .bind(scored_at)
            .bind(&attempt.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(rows)
    }

    async fn list_finished_attempts(&self, test_id: &str) -> StoreResult<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts
             WHERE test_id = $1 AND completed
             ORDER BY end_time ASC"
        ))
        .bind(test_id)
        .fetch_all(self.pool())
        .await?;
        Ok(attempts)
    }

    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts
             WHERE NOT completed AND end_time < $1
             ORDER BY end_time ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(attempts)
    }
}
