//! Every permission decision in one place.
//!
//! `authorize` is pure: callers load the facts about the target first
//! (course owner, test author, enrollment) and pass them in.

use std::fmt;

use crate::db::models::{Course, Test};
use crate::db::types::UserRole;
use crate::repositories::Store;
use crate::services::errors::{ExamError, ExamResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub(crate) user_id: String,
    pub(crate) role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    CreateCourse,
    /// Assign the teacher, enroll students.
    ManageCourse,
    ViewCourse,
    /// Create tests and questions.
    AuthorTests,
    ViewTest,
    /// Start, answer, finish and read one's own score.
    TakeTest,
    /// Results, statistics, grading.
    ReviewTest,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Resource {
    pub(crate) course_teacher_id: Option<String>,
    pub(crate) test_creator_id: Option<String>,
    pub(crate) enrolled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DenyReason {
    NotEnrolled,
    WrongRole,
    NotOwner,
}

impl DenyReason {
    pub(crate) fn code(self) -> &'static str {
        match self {
            DenyReason::NotEnrolled => "not_enrolled",
            DenyReason::WrongRole => "wrong_role",
            DenyReason::NotOwner => "not_owner",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            DenyReason::NotEnrolled => "not enrolled in this course",
            DenyReason::WrongRole => "not allowed for this role",
            DenyReason::NotOwner => "not the owner of this resource",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Resource {
    fn owned_by(&self, user_id: &str) -> bool {
        self.course_teacher_id.as_deref() == Some(user_id)
            || self.test_creator_id.as_deref() == Some(user_id)
    }
}

pub(crate) fn authorize(identity: &Identity, action: Action, resource: &Resource) -> Decision {
    use Decision::{Allowed, Denied};

    match (identity.role, action) {
        (UserRole::Admin, Action::TakeTest) => Denied(DenyReason::WrongRole),
        (UserRole::Admin, _) => Allowed,

        (UserRole::Teacher, Action::CreateCourse) => Allowed,
        (UserRole::Teacher, Action::ManageCourse | Action::TakeTest) => {
            Denied(DenyReason::WrongRole)
        }
        (UserRole::Teacher, Action::AuthorTests) => {
            if resource.course_teacher_id.as_deref() == Some(identity.user_id.as_str()) {
                Allowed
            } else {
                Denied(DenyReason::NotOwner)
            }
        }
        (UserRole::Teacher, Action::ViewCourse | Action::ViewTest | Action::ReviewTest) => {
            if resource.owned_by(&identity.user_id) {
                Allowed
            } else {
                Denied(DenyReason::NotOwner)
            }
        }

        (UserRole::Student, Action::ViewCourse | Action::ViewTest | Action::TakeTest) => {
            if resource.enrolled {
                Allowed
            } else {
                Denied(DenyReason::NotEnrolled)
            }
        }
        (UserRole::Student, _) => Denied(DenyReason::WrongRole),
    }
}

/// Runs the gate and turns a denial into an error.
pub(crate) fn ensure(identity: &Identity, action: Action, resource: &Resource) -> ExamResult<()> {
    match authorize(identity, action, resource) {
        Decision::Allowed => Ok(()),
        Decision::Denied(DenyReason::NotEnrolled) => Err(ExamError::NotEnrolled),
        Decision::Denied(reason) => Err(ExamError::Forbidden(reason)),
    }
}

pub(crate) async fn course_resource(
    store: &dyn Store,
    identity: &Identity,
    course: &Course,
) -> ExamResult<Resource> {
    let enrolled = identity.role == UserRole::Student
        && store.is_enrolled(&course.id, &identity.user_id).await?;
    Ok(Resource { course_teacher_id: Some(course.teacher_id.clone()), test_creator_id: None, enrolled })
}

pub(crate) async fn test_resource(
    store: &dyn Store,
    identity: &Identity,
    test: &Test,
) -> ExamResult<Resource> {
    let course = store.find_course(&test.course_id).await?.ok_or(ExamError::NotFound("course"))?;
    let enrolled = identity.role == UserRole::Student
        && store.is_enrolled(&course.id, &identity.user_id).await?;
    Ok(Resource {
        course_teacher_id: Some(course.teacher_id),
        test_creator_id: Some(test.creator_id.clone()),
        enrolled,
    })
}
