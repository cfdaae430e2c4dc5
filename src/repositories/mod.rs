pub(crate) mod answers;
pub(crate) mod attempts;
pub(crate) mod catalog;
pub(crate) mod courses;
pub(crate) mod users;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

pub(crate) use answers::{AnswerRepository, NewAnswer, ScoringRow};
pub(crate) use attempts::{AttemptInsert, AttemptRepository, NewAttempt};
pub(crate) use catalog::{
    CatalogRepository, NewChoice, NewQuestion, NewTest, QuestionWithChoices, TestScope,
};
pub(crate) use courses::{CourseRepository, CourseScope, NewCourse};
pub(crate) use users::{NewUser, UpdateUser, UserRepository};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

/// Everything the exam core needs from persistence.
#[async_trait]
pub(crate) trait Store:
    UserRepository + CourseRepository + CatalogRepository + AttemptRepository + AnswerRepository
{
    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Clone)]
pub(crate) struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgRepository {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Serializes writers of one (test, student) pair for the rest of the transaction.
pub(crate) async fn acquire_attempt_lock(
    executor: impl sqlx::PgExecutor<'_>,
    test_id: &str,
    student_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("attempt:{test_id}:{student_id}"))
        .execute(executor)
        .await?;
    Ok(())
}
