use async_trait::async_trait;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerSubmission, TestAttempt};
use crate::db::types::QuestionType;
use crate::repositories::{acquire_attempt_lock, PgRepository, StoreResult};

const COLUMNS: &str = "id, question_id, student_id, attempt_id, selected_choice_id, answer_text, \
                       teacher_score, submitted_at, graded_at";

#[derive(Debug, Clone)]
pub(crate) struct NewAnswer {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_id: String,
    pub(crate) selected_choice_id: Option<String>,
    pub(crate) answer_text: Option<String>,
    pub(crate) submitted_at: PrimitiveDateTime,
}

/// A submission joined with what scoring needs from its question and choice.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct ScoringRow {
    pub(crate) question_type: QuestionType,
    pub(crate) is_correct: Option<bool>,
    pub(crate) teacher_score: Option<f64>,
}

/// Turns one student's scoring rows into the persisted overall score.
pub(crate) type ScoreFn = dyn Fn(&[ScoringRow]) -> f64 + Send + Sync;

#[async_trait]
pub(crate) trait AnswerRepository: Send + Sync {
    /// Writes the answer unless the attempt was closed or ran out of time
    /// before the write could take the attempt lock; returns `None` then.
    async fn upsert_answer(
        &self,
        attempt: &TestAttempt,
        answer: NewAnswer,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>>;
    async fn find_answer(
        &self,
        question_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AnswerSubmission>>;
    async fn list_attempt_answers(&self, attempt_id: &str) -> StoreResult<Vec<AnswerSubmission>>;
    async fn set_teacher_score(
        &self,
        answer_id: &str,
        score: f64,
        graded_at: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>>;
    async fn list_scoring_rows(&self, test_id: &str, student_id: &str)
        -> StoreResult<Vec<ScoringRow>>;
}

pub(crate) async fn fetch_scoring_rows(
    executor: impl sqlx::PgExecutor<'_>,
    test_id: &str,
    student_id: &str,
) -> Result<Vec<ScoringRow>, sqlx::Error> {
    sqlx::query_as::<_, ScoringRow>(
        "SELECT q.question_type, ch.is_correct, a.teacher_score
         FROM answer_submissions a
         JOIN questions q ON q.id = a.question_id
         LEFT JOIN choices ch ON ch.id = a.selected_choice_id
         WHERE q.test_id = $1 AND a.student_id = $2",
    )
    .bind(test_id)
    .bind(student_id)
    .fetch_all(executor)
    .await
}

/// Last write wins on (question, student). A rewrite drops any grade.
pub(crate) async fn write_answer(
    executor: impl sqlx::PgExecutor<'_>,
    answer: &NewAnswer,
) -> Result<AnswerSubmission, sqlx::Error> {
    sqlx::query_as::<_, AnswerSubmission>(&format!(
        "INSERT INTO answer_submissions (
            id, question_id, student_id, attempt_id, selected_choice_id, answer_text, submitted_at
         )
         VALUES ($1,$2,$3,$4,$5,$6,$7)
         ON CONFLICT (question_id, student_id) DO UPDATE SET
            attempt_id = EXCLUDED.attempt_id,
            selected_choice_id = EXCLUDED.selected_choice_id,
            answer_text = EXCLUDED.answer_text,
            submitted_at = EXCLUDED.submitted_at,
            teacher_score = NULL,
            graded_at = NULL
         RETURNING {COLUMNS}"
    ))
    .bind(&answer.id)
    .bind(&answer.question_id)
    .bind(&answer.student_id)
    .bind(&answer.attempt_id)
    .bind(&answer.selected_choice_id)
    .bind(&answer.answer_text)
    .bind(answer.submitted_at)
    .fetch_one(executor)
    .await
}

#[async_trait]
impl AnswerRepository for PgRepository {
    async fn upsert_answer(
        &self,
        attempt: &TestAttempt,
        answer: NewAnswer,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let mut tx = self.pool().begin().await?;
        acquire_attempt_lock(&mut *tx, &attempt.test_id, &attempt.student_id).await?;

        let open: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM test_attempts WHERE id = $1 AND NOT completed AND end_time >= $2",
        )
        .bind(&attempt.id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let saved = write_answer(&mut *tx, &answer).await?;
        tx.commit().await?;
        Ok(Some(saved))
    }

    async fn find_answer(
        &self,
        question_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let answer = sqlx::query_as::<_, AnswerSubmission>(&format!(
            "SELECT {COLUMNS} FROM answer_submissions WHERE question_id = $1 AND student_id = $2"
        ))
        .bind(question_id)
        .bind(student_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(answer)
    }

    async fn list_attempt_answers(&self, attempt_id: &str) -> StoreResult<Vec<AnswerSubmission>> {
        let answers = sqlx::query_as::<_, AnswerSubmission>(&format!(
            "SELECT {COLUMNS} FROM answer_submissions WHERE attempt_id = $1 ORDER BY submitted_at"
        ))
        .bind(attempt_id)
        .fetch_all(self.pool())
        .await?;
        Ok(answers)
    }

    async fn set_teacher_score(
        &self,
        answer_id: &str,
        score: f64,
        graded_at: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let answer = sqlx::query_as::<_, AnswerSubmission>(&format!(
            "UPDATE answer_submissions SET teacher_score = $1, graded_at = $2
             WHERE id = $3
             RETURNING {COLUMNS}"
        ))
        .bind(score)
        .bind(graded_at)
        .bind(answer_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(answer)
    }

    async fn list_scoring_rows(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<ScoringRow>> {
        Ok(fetch_scoring_rows(self.pool(), test_id, student_id).await?)
    }
}
