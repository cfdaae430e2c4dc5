use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Course;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CourseCreate {
    #[validate(length(min = 1, max = 255, message = "name must be 1-255 characters"))]
    pub(crate) name: String,
    /// Required when an admin creates the course.
    #[serde(default)]
    pub(crate) teacher_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignTeacherRequest {
    pub(crate) teacher_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnrollStudentRequest {
    pub(crate) student_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EnrollmentResponse {
    pub(crate) course_id: String,
    pub(crate) student_id: String,
    pub(crate) newly_enrolled: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct CourseResponse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) teacher_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) student_count: Option<i64>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl CourseResponse {
    pub(crate) fn from_db(course: Course) -> Self {
        Self {
            id: course.id,
            name: course.name,
            teacher_id: course.teacher_id,
            student_count: None,
            created_at: format_primitive(course.created_at),
            updated_at: format_primitive(course.updated_at),
        }
    }

    pub(crate) fn with_student_count(mut self, count: i64) -> Self {
        self.student_count = Some(count);
        self
    }
}
