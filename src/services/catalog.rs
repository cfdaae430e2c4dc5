use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{Course, Test, User};
use crate::db::types::{QuestionType, UserRole};
use crate::repositories::{
    CourseScope, NewChoice, NewCourse, NewQuestion, NewTest, QuestionWithChoices, TestScope,
};
use crate::services::access::{self, Action, Identity, Resource};
use crate::services::errors::{ExamError, ExamResult};

#[derive(Debug, Clone)]
pub(crate) struct ChoiceDraft {
    pub(crate) choice_text: String,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct QuestionDraft {
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) choices: Vec<ChoiceDraft>,
}

#[derive(Debug, Clone)]
pub(crate) struct TestDraft {
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) time_limit_seconds: i64,
    pub(crate) deadline: PrimitiveDateTime,
    pub(crate) questions: Vec<QuestionDraft>,
}

/// One week. Attempt end times are computed as `start + limit`.
pub(crate) const MAX_TIME_LIMIT_SECONDS: i64 = 7 * 24 * 3600;

fn invalid(message: impl Into<String>) -> ExamError {
    ExamError::InvalidInput(message.into())
}

async fn user_with_role(state: &AppState, user_id: &str, role: UserRole) -> ExamResult<User> {
    let user = state.store().find_user_by_id(user_id).await?.ok_or(ExamError::NotFound("user"))?;
    if user.role != role {
        return Err(invalid(format!("user {} is not a {}", user.id, role.as_str())));
    }
    Ok(user)
}

async fn find_course(state: &AppState, course_id: &str) -> ExamResult<Course> {
    state.store().find_course(course_id).await?.ok_or(ExamError::NotFound("course"))
}

async fn find_test(state: &AppState, test_id: &str) -> ExamResult<Test> {
    state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))
}

/// Teachers always own what they create; admins name the owner.
pub(crate) async fn create_course(
    state: &AppState,
    identity: &Identity,
    name: String,
    teacher_id: Option<String>,
    now: PrimitiveDateTime,
) -> ExamResult<Course> {
    access::ensure(identity, Action::CreateCourse, &Resource::default())?;

    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(invalid("course name must not be empty"));
    }

    let teacher_id = match (identity.role, teacher_id) {
        (UserRole::Teacher, None) => identity.user_id.clone(),
        (UserRole::Teacher, Some(id)) if id == identity.user_id => id,
        (UserRole::Teacher, Some(_)) => {
            return Err(ExamError::Forbidden(access::DenyReason::NotOwner));
        }
        (_, Some(id)) => user_with_role(state, &id, UserRole::Teacher).await?.id,
        (_, None) => return Err(invalid("teacher_id is required")),
    };

    let course = state
        .store()
        .create_course(NewCourse { id: Uuid::new_v4().to_string(), name, teacher_id, created_at: now })
        .await?;
    tracing::info!(course_id = %course.id, teacher_id = %course.teacher_id, "Course created");
    Ok(course)
}

pub(crate) async fn list_courses(state: &AppState, identity: &Identity) -> ExamResult<Vec<Course>> {
    let scope = match identity.role {
        UserRole::Admin => CourseScope::All,
        UserRole::Teacher => CourseScope::TaughtBy(identity.user_id.clone()),
        UserRole::Student => CourseScope::EnrolledStudent(identity.user_id.clone()),
    };
    Ok(state.store().list_courses(scope).await?)
}

pub(crate) async fn get_course(
    state: &AppState,
    identity: &Identity,
    course_id: &str,
) -> ExamResult<Course> {
    let course = find_course(state, course_id).await?;
    let resource = access::course_resource(state.store(), identity, &course).await?;
    access::ensure(identity, Action::ViewCourse, &resource)?;
    Ok(course)
}

pub(crate) async fn assign_teacher(
    state: &AppState,
    identity: &Identity,
    course_id: &str,
    teacher_id: &str,
    now: PrimitiveDateTime,
) -> ExamResult<Course> {
    let course = find_course(state, course_id).await?;
    let resource = access::course_resource(state.store(), identity, &course).await?;
    access::ensure(identity, Action::ManageCourse, &resource)?;

    let teacher = user_with_role(state, teacher_id, UserRole::Teacher).await?;
    let updated = state
        .store()
        .assign_teacher(&course.id, &teacher.id, now)
        .await?
        .ok_or(ExamError::NotFound("course"))?;
    tracing::info!(course_id = %updated.id, teacher_id = %teacher.id, "Course teacher assigned");
    Ok(updated)
}

/// Returns `false` when the student was already enrolled.
pub(crate) async fn enroll_student(
    state: &AppState,
    identity: &Identity,
    course_id: &str,
    student_id: &str,
    now: PrimitiveDateTime,
) -> ExamResult<bool> {
    let course = find_course(state, course_id).await?;
    let resource = access::course_resource(state.store(), identity, &course).await?;
    access::ensure(identity, Action::ManageCourse, &resource)?;

    let student = user_with_role(state, student_id, UserRole::Student).await?;
    let enrolled = state.store().enroll_student(&course.id, &student.id, now).await?;
    if enrolled {
        tracing::info!(course_id = %course.id, student_id = %student.id, "Student enrolled");
    }
    Ok(enrolled)
}

fn validate_question(draft: &QuestionDraft) -> ExamResult<()> {
    if draft.question_text.trim().is_empty() {
        return Err(invalid("question_text must not be empty"));
    }
    match draft.question_type {
        QuestionType::Mcq => {
            if draft.choices.is_empty() {
                return Err(invalid("multiple-choice questions need at least one choice"));
            }
            if !draft.choices.iter().any(|choice| choice.is_correct) {
                return Err(invalid("multiple-choice questions need a correct choice"));
            }
            if draft.choices.iter().any(|choice| choice.choice_text.trim().is_empty()) {
                return Err(invalid("choice_text must not be empty"));
            }
        }
        QuestionType::Open => {
            if !draft.choices.is_empty() {
                return Err(invalid("open-ended questions cannot have choices"));
            }
        }
    }
    Ok(())
}

fn new_question(draft: QuestionDraft) -> NewQuestion {
    NewQuestion {
        id: Uuid::new_v4().to_string(),
        question_text: draft.question_text,
        question_type: draft.question_type,
        choices: draft
            .choices
            .into_iter()
            .map(|choice| NewChoice {
                id: Uuid::new_v4().to_string(),
                choice_text: choice.choice_text,
                is_correct: choice.is_correct,
            })
            .collect(),
    }
}

pub(crate) async fn create_test(
    state: &AppState,
    identity: &Identity,
    draft: TestDraft,
    now: PrimitiveDateTime,
) -> ExamResult<Test> {
    let course = find_course(state, &draft.course_id).await?;
    let resource = access::course_resource(state.store(), identity, &course).await?;
    access::ensure(identity, Action::AuthorTests, &resource)?;

    if draft.title.trim().is_empty() {
        return Err(invalid("title must not be empty"));
    }
    if draft.time_limit_seconds <= 0 {
        return Err(invalid("time_limit_seconds must be positive"));
    }
    if draft.time_limit_seconds > MAX_TIME_LIMIT_SECONDS {
        return Err(invalid(format!(
            "time_limit_seconds must not exceed {MAX_TIME_LIMIT_SECONDS}"
        )));
    }
    for question in &draft.questions {
        validate_question(question)?;
    }

    let test = state
        .store()
        .create_test(NewTest {
            id: Uuid::new_v4().to_string(),
            course_id: course.id,
            creator_id: identity.user_id.clone(),
            title: draft.title.trim().to_string(),
            time_limit_seconds: draft.time_limit_seconds,
            deadline: draft.deadline,
            created_at: now,
            questions: draft.questions.into_iter().map(new_question).collect(),
        })
        .await?;
    tracing::info!(test_id = %test.id, course_id = %test.course_id, "Test created");
    Ok(test)
}

pub(crate) async fn list_tests(
    state: &AppState,
    identity: &Identity,
    course_id: Option<String>,
) -> ExamResult<Vec<Test>> {
    let scope = match identity.role {
        UserRole::Admin => TestScope::All,
        UserRole::Teacher => TestScope::TaughtOrCreatedBy(identity.user_id.clone()),
        UserRole::Student => TestScope::EnrolledStudent(identity.user_id.clone()),
    };
    Ok(state.store().list_tests(scope, course_id).await?)
}

pub(crate) async fn get_test(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
) -> ExamResult<Test> {
    let test = find_test(state, test_id).await?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::ViewTest, &resource)?;
    Ok(test)
}

/// One page of questions (1-based) plus the total count.
pub(crate) async fn list_questions(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    page: i64,
    page_size: i64,
) -> ExamResult<(Vec<QuestionWithChoices>, i64)> {
    let test = get_test(state, identity, test_id).await?;
    let offset = (page.max(1) - 1) * page_size;
    let questions = state.store().list_questions(&test.id, offset, page_size).await?;
    let total = state.store().count_questions(&test.id, None).await?;
    Ok((questions, total))
}

pub(crate) async fn add_question(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    draft: QuestionDraft,
) -> ExamResult<QuestionWithChoices> {
    let test = find_test(state, test_id).await?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::AuthorTests, &resource)?;
    validate_question(&draft)?;

    Ok(state.store().add_question(&test.id, new_question(draft)).await?)
}
