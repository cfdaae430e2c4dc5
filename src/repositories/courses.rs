use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::Course;
use crate::repositories::{PgRepository, StoreResult};

const COURSE_COLUMNS: &str = "c.id, c.name, c.teacher_id, c.created_at, c.updated_at";

#[derive(Debug, Clone)]
pub(crate) struct NewCourse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) teacher_id: String,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Which courses a listing covers.
#[derive(Debug, Clone)]
pub(crate) enum CourseScope {
    All,
    TaughtBy(String),
    EnrolledStudent(String),
}

#[async_trait]
pub(crate) trait CourseRepository: Send + Sync {
    async fn create_course(&self, course: NewCourse) -> StoreResult<Course>;
    async fn find_course(&self, id: &str) -> StoreResult<Option<Course>>;
    async fn list_courses(&self, scope: CourseScope) -> StoreResult<Vec<Course>>;
    /// Returns the updated course, or `None` if it does not exist.
    async fn assign_teacher(
        &self,
        course_id: &str,
        teacher_id: &str,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<Option<Course>>;
    /// Returns `true` when a new enrollment row was written.
    async fn enroll_student(
        &self,
        course_id: &str,
        student_id: &str,
        enrolled_at: PrimitiveDateTime,
    ) -> StoreResult<bool>;
    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> StoreResult<bool>;
    async fn count_enrolled(&self, course_id: &str) -> StoreResult<i64>;
}

#[async_trait]
impl CourseRepository for PgRepository {
    async fn create_course(&self, course: NewCourse) -> StoreResult<Course> {
        let created = sqlx::query_as::<_, Course>(
            "INSERT INTO courses (id, name, teacher_id, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$4)
             RETURNING id, name, teacher_id, created_at, updated_at",
        )
        .bind(course.id)
        .bind(course.name)
        .bind(course.teacher_id)
        .bind(course.created_at)
        .fetch_one(self.pool())
        .await?;
        Ok(created)
    }

    async fn find_course(&self, id: &str) -> StoreResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(course)
    }

    async fn list_courses(&self, scope: CourseScope) -> StoreResult<Vec<Course>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {COURSE_COLUMNS} FROM courses c"));

        match scope {
            CourseScope::All => {}
            CourseScope::TaughtBy(teacher_id) => {
                builder.push(" WHERE c.teacher_id = ");
                builder.push_bind(teacher_id);
            }
            CourseScope::EnrolledStudent(student_id) => {
                builder.push(
                    " JOIN course_enrollments e ON e.course_id = c.id WHERE e.student_id = ",
                );
                builder.push_bind(student_id);
            }
        }

        builder.push(" ORDER BY c.created_at DESC");

        let courses = builder.build_query_as::<Course>().fetch_all(self.pool()).await?;
        Ok(courses)
    }

    async fn assign_teacher(
        &self,
        course_id: &str,
        teacher_id: &str,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            "UPDATE courses SET teacher_id = $1, updated_at = $2
             WHERE id = $3
             RETURNING id, name, teacher_id, created_at, updated_at",
        )
        .bind(teacher_id)
        .bind(updated_at)
        .bind(course_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(course)
    }

    async fn enroll_student(
        &self,
        course_id: &str,
        student_id: &str,
        enrolled_at: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO course_enrollments (course_id, student_id, enrolled_at)
             VALUES ($1,$2,$3)
             ON CONFLICT DO NOTHING",
        )
        .bind(course_id)
        .bind(student_id)
        .bind(enrolled_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> StoreResult<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM course_enrollments WHERE course_id = $1 AND student_id = $2",
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    async fn count_enrolled(&self, course_id: &str) -> StoreResult<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM course_enrollments WHERE course_id = $1")
                .bind(course_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
