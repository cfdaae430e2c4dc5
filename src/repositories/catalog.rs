use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::{Choice, Question, Test};
use crate::db::types::QuestionType;
use crate::repositories::{PgRepository, StoreResult};

const TEST_COLUMNS: &str =
    "t.id, t.course_id, t.creator_id, t.title, t.time_limit_seconds, t.deadline, t.created_at";
const QUESTION_COLUMNS: &str = "id, test_id, question_text, question_type, position";
const CHOICE_COLUMNS: &str = "id, question_id, choice_text, is_correct";

#[derive(Debug, Clone)]
pub(crate) struct NewChoice {
    pub(crate) id: String,
    pub(crate) choice_text: String,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct NewQuestion {
    pub(crate) id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) choices: Vec<NewChoice>,
}

#[derive(Debug, Clone)]
pub(crate) struct NewTest {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) creator_id: String,
    pub(crate) title: String,
    pub(crate) time_limit_seconds: i64,
    pub(crate) deadline: PrimitiveDateTime,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) questions: Vec<NewQuestion>,
}

#[derive(Debug, Clone)]
pub(crate) struct QuestionWithChoices {
    pub(crate) question: Question,
    pub(crate) choices: Vec<Choice>,
}

#[derive(Debug, Clone)]
pub(crate) enum TestScope {
    All,
    /// Tests in courses the teacher owns, plus tests they authored.
    TaughtOrCreatedBy(String),
    EnrolledStudent(String),
}

#[async_trait]
pub(crate) trait CatalogRepository: Send + Sync {
    async fn create_test(&self, test: NewTest) -> StoreResult<Test>;
    async fn find_test(&self, id: &str) -> StoreResult<Option<Test>>;
    async fn list_tests(&self, scope: TestScope, course_id: Option<String>)
        -> StoreResult<Vec<Test>>;
    async fn add_question(&self, test_id: &str, question: NewQuestion)
        -> StoreResult<QuestionWithChoices>;
    async fn find_question(&self, id: &str) -> StoreResult<Option<QuestionWithChoices>>;
    async fn list_questions(
        &self,
        test_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<QuestionWithChoices>>;
    async fn count_questions(
        &self,
        test_id: &str,
        question_type: Option<QuestionType>,
    ) -> StoreResult<i64>;
}

async fn insert_question(
    conn: &mut sqlx::PgConnection,
    test_id: &str,
    position: i32,
    question: NewQuestion,
) -> Result<QuestionWithChoices, sqlx::Error> {
    let inserted = sqlx::query_as::<_, Question>(&format!(
        "INSERT INTO questions (id, test_id, question_text, question_type, position)
         VALUES ($1,$2,$3,$4,$5)
         RETURNING {QUESTION_COLUMNS}"
    ))
    .bind(&question.id)
    .bind(test_id)
    .bind(&question.question_text)
    .bind(question.question_type)
    .bind(position)
    .fetch_one(&mut *conn)
    .await?;

    let mut choices = Vec::with_capacity(question.choices.len());
    for choice in question.choices {
        let row = sqlx::query_as::<_, Choice>(&format!(
            "INSERT INTO choices (id, question_id, choice_text, is_correct)
             VALUES ($1,$2,$3,$4)
             RETURNING {CHOICE_COLUMNS}"
        ))
        .bind(choice.id)
        .bind(&inserted.id)
        .bind(choice.choice_text)
        .bind(choice.is_correct)
        .fetch_one(&mut *conn)
        .await?;
        choices.push(row);
    }

    Ok(QuestionWithChoices { question: inserted, choices })
}

async fn attach_choices(
    pool: &sqlx::PgPool,
    questions: Vec<Question>,
) -> Result<Vec<QuestionWithChoices>, sqlx::Error> {
    if questions.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = questions.iter().map(|question| question.id.clone()).collect();
    let choices = sqlx::query_as::<_, Choice>(&format!(
        "SELECT {CHOICE_COLUMNS} FROM choices WHERE question_id = ANY($1) ORDER BY id"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    Ok(questions
        .into_iter()
        .map(|question| {
            let own = choices
                .iter()
                .filter(|choice| choice.question_id == question.id)
                .cloned()
                .collect();
            QuestionWithChoices { question, choices: own }
        })
        .collect())
}

#[async_trait]
impl CatalogRepository for PgRepository {
    async fn create_test(&self, test: NewTest) -> StoreResult<Test> {
        let mut tx = self.pool().begin().await?;

        let created = sqlx::query_as::<_, Test>(
            "INSERT INTO tests (id, course_id, creator_id, title, time_limit_seconds, deadline, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING id, course_id, creator_id, title, time_limit_seconds, deadline, created_at",
        )
        .bind(&test.id)
        .bind(&test.course_id)
        .bind(&test.creator_id)
        .bind(&test.title)
        .bind(test.time_limit_seconds)
        .bind(test.deadline)
        .bind(test.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for (index, question) in test.questions.into_iter().enumerate() {
            insert_question(&mut tx, &created.id, index as i32 + 1, question).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_test(&self, id: &str) -> StoreResult<Option<Test>> {
        let test =
            sqlx::query_as::<_, Test>(&format!("SELECT {TEST_COLUMNS} FROM tests t WHERE t.id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(test)
    }

    async fn list_tests(
        &self,
        scope: TestScope,
        course_id: Option<String>,
    ) -> StoreResult<Vec<Test>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TEST_COLUMNS} FROM tests t JOIN courses c ON c.id = t.course_id WHERE 1=1"
        ));

        match scope {
            TestScope::All => {}
            TestScope::TaughtOrCreatedBy(teacher_id) => {
                builder.push(" AND (c.teacher_id = ");
                builder.push_bind(teacher_id.clone());
                builder.push(" OR t.creator_id = ");
                builder.push_bind(teacher_id);
                builder.push(")");
            }
            TestScope::EnrolledStudent(student_id) => {
                builder.push(
                    " AND EXISTS (SELECT 1 FROM course_enrollments e WHERE e.course_id = t.course_id AND e.student_id = ",
                );
                builder.push_bind(student_id);
                builder.push(")");
            }
        }

        if let Some(course_id) = course_id {
            builder.push(" AND t.course_id = ");
            builder.push_bind(course_id);
        }

        builder.push(" ORDER BY t.deadline ASC, t.created_at ASC");

        let tests = builder.build_query_as::<Test>().fetch_all(self.pool()).await?;
        Ok(tests)
    }

    async fn add_question(
        &self,
        test_id: &str,
        question: NewQuestion,
    ) -> StoreResult<QuestionWithChoices> {
        let mut tx = self.pool().begin().await?;

        let position: i32 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM questions WHERE test_id = $1")
                .bind(test_id)
                .fetch_one(&mut *tx)
                .await?;

        let created = insert_question(&mut tx, test_id, position, question).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn find_question(&self, id: &str) -> StoreResult<Option<QuestionWithChoices>> {
        let question = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        let Some(question) = question else {
            return Ok(None);
        };
        let mut attached = attach_choices(self.pool(), vec![question]).await?;
        Ok(attached.pop())
    }

    async fn list_questions(
        &self,
        test_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<QuestionWithChoices>> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE test_id = $1
             ORDER BY position ASC
             OFFSET $2 LIMIT $3"
        ))
        .bind(test_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(attach_choices(self.pool(), questions).await?)
    }

    async fn count_questions(
        &self,
        test_id: &str,
        question_type: Option<QuestionType>,
    ) -> StoreResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM questions
             WHERE test_id = $1 AND ($2::question_type IS NULL OR question_type = $2)",
        )
        .bind(test_id)
        .bind(question_type)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}
