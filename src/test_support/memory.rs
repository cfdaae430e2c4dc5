use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerSubmission, Choice, Course, Question, Test, TestAttempt, User};
use crate::db::types::QuestionType;
use crate::repositories::answers::ScoreFn;
use crate::repositories::{
    AnswerRepository, AttemptInsert, AttemptRepository, CatalogRepository, CourseRepository,
    CourseScope, NewAnswer, NewAttempt, NewCourse, NewQuestion, NewTest, NewUser,
    QuestionWithChoices, ScoringRow, Store, StoreResult, TestScope, UpdateUser, UserRepository,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    courses: Vec<Course>,
    enrollments: HashSet<(String, String)>,
    tests: Vec<Test>,
    questions: Vec<Question>,
    choices: Vec<Choice>,
    attempts: Vec<TestAttempt>,
    answers: Vec<AnswerSubmission>,
}

impl Tables {
    fn scoring_rows(&self, test_id: &str, student_id: &str) -> Vec<ScoringRow> {
        self.answers
            .iter()
            .filter(|answer| answer.student_id == student_id)
            .filter_map(|answer| {
                let question = self
                    .questions
                    .iter()
                    .find(|q| q.id == answer.question_id && q.test_id == test_id)?;
                let is_correct = answer.selected_choice_id.as_ref().and_then(|choice_id| {
                    self.choices.iter().find(|c| &c.id == choice_id).map(|c| c.is_correct)
                });
                Some(ScoringRow {
                    question_type: question.question_type,
                    is_correct,
                    teacher_score: answer.teacher_score,
                })
            })
            .collect()
    }

    fn with_choices(&self, question: Question) -> QuestionWithChoices {
        let choices =
            self.choices.iter().filter(|choice| choice.question_id == question.id).cloned().collect();
        QuestionWithChoices { question, choices }
    }

    fn push_question(&mut self, test_id: &str, position: i32, question: NewQuestion) -> QuestionWithChoices {
        let row = Question {
            id: question.id.clone(),
            test_id: test_id.to_string(),
            question_text: question.question_text,
            question_type: question.question_type,
            position,
        };
        for choice in question.choices {
            self.choices.push(Choice {
                id: choice.id,
                question_id: question.id.clone(),
                choice_text: choice.choice_text,
                is_correct: choice.is_correct,
            });
        }
        self.questions.push(row.clone());
        self.with_choices(row)
    }

    fn write_answer(&mut self, answer: &NewAnswer) -> AnswerSubmission {
        if let Some(existing) = self.answers.iter_mut().find(|row| {
            row.question_id == answer.question_id && row.student_id == answer.student_id
        }) {
            existing.attempt_id = answer.attempt_id.clone();
            existing.selected_choice_id = answer.selected_choice_id.clone();
            existing.answer_text = answer.answer_text.clone();
            existing.submitted_at = answer.submitted_at;
            existing.teacher_score = None;
            existing.graded_at = None;
            return existing.clone();
        }

        let row = AnswerSubmission {
            id: answer.id.clone(),
            question_id: answer.question_id.clone(),
            student_id: answer.student_id.clone(),
            attempt_id: answer.attempt_id.clone(),
            selected_choice_id: answer.selected_choice_id.clone(),
            answer_text: answer.answer_text.clone(),
            teacher_score: None,
            submitted_at: answer.submitted_at,
            graded_at: None,
        };
        self.answers.push(row.clone());
        row
    }
}

/// `Store` over plain vectors, mirroring the uniqueness rules of the schema.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub(crate) fn attempt_count(&self) -> usize {
        self.tables.lock().unwrap().attempts.len()
    }

    pub(crate) fn answers_for(&self, student_id: &str) -> Vec<AnswerSubmission> {
        self.tables
            .lock()
            .unwrap()
            .answers
            .iter()
            .filter(|answer| answer.student_id == student_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().unwrap();
        if tables.users.iter().any(|row| row.username == user.username) {
            return Ok(None);
        }
        let row = User {
            id: user.id,
            username: user.username,
            hashed_password: user.hashed_password,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        tables.users.push(row.clone());
        Ok(Some(row))
    }

    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.iter().find(|row| row.id == id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.iter().find(|row| row.username == username).cloned())
    }

    async fn update_user(
        &self,
        id: &str,
        params: UpdateUser,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(user) = tables.users.iter_mut().find(|row| row.id == id) {
            if let Some(hash) = params.hashed_password {
                user.hashed_password = hash;
            }
            if let Some(role) = params.role {
                user.role = role;
            }
            if let Some(is_active) = params.is_active {
                user.is_active = is_active;
            }
            user.updated_at = updated_at;
        }
        Ok(())
    }
}

#[async_trait]
impl CourseRepository for MemoryStore {
    async fn create_course(&self, course: NewCourse) -> StoreResult<Course> {
        let row = Course {
            id: course.id,
            name: course.name,
            teacher_id: course.teacher_id,
            created_at: course.created_at,
            updated_at: course.created_at,
        };
        self.tables.lock().unwrap().courses.push(row.clone());
        Ok(row)
    }

    async fn find_course(&self, id: &str) -> StoreResult<Option<Course>> {
        Ok(self.tables.lock().unwrap().courses.iter().find(|row| row.id == id).cloned())
    }

    async fn list_courses(&self, scope: CourseScope) -> StoreResult<Vec<Course>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .courses
            .iter()
            .filter(|course| match &scope {
                CourseScope::All => true,
                CourseScope::TaughtBy(teacher_id) => &course.teacher_id == teacher_id,
                CourseScope::EnrolledStudent(student_id) => {
                    tables.enrollments.contains(&(course.id.clone(), student_id.clone()))
                }
            })
            .cloned()
            .collect())
    }

    async fn assign_teacher(
        &self,
        course_id: &str,
        teacher_id: &str,
        updated_at: PrimitiveDateTime,
    ) -> StoreResult<Option<Course>> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.courses.iter_mut().find(|row| row.id == course_id).map(|course| {
            course.teacher_id = teacher_id.to_string();
            course.updated_at = updated_at;
            course.clone()
        }))
    }

    async fn enroll_student(
        &self,
        course_id: &str,
        student_id: &str,
        _enrolled_at: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.enrollments.insert((course_id.to_string(), student_id.to_string())))
    }

    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.enrollments.contains(&(course_id.to_string(), student_id.to_string())))
    }

    async fn count_enrolled(&self, course_id: &str) -> StoreResult<i64> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.enrollments.iter().filter(|(course, _)| course == course_id).count() as i64)
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn create_test(&self, test: NewTest) -> StoreResult<Test> {
        let mut tables = self.tables.lock().unwrap();
        let row = Test {
            id: test.id,
            course_id: test.course_id,
            creator_id: test.creator_id,
            title: test.title,
            time_limit_seconds: test.time_limit_seconds,
            deadline: test.deadline,
            created_at: test.created_at,
        };
        for (index, question) in test.questions.into_iter().enumerate() {
            tables.push_question(&row.id, index as i32 + 1, question);
        }
        tables.tests.push(row.clone());
        Ok(row)
    }

    async fn find_test(&self, id: &str) -> StoreResult<Option<Test>> {
        Ok(self.tables.lock().unwrap().tests.iter().find(|row| row.id == id).cloned())
    }

    async fn list_tests(
        &self,
        scope: TestScope,
        course_id: Option<String>,
    ) -> StoreResult<Vec<Test>> {
        let tables = self.tables.lock().unwrap();
        let teacher_of = |course_id: &str| {
            tables.courses.iter().find(|course| course.id == course_id).map(|c| c.teacher_id.clone())
        };
        let mut tests: Vec<Test> = tables
            .tests
            .iter()
            .filter(|test| course_id.as_ref().map_or(true, |id| &test.course_id == id))
            .filter(|test| match &scope {
                TestScope::All => true,
                TestScope::TaughtOrCreatedBy(teacher_id) => {
                    &test.creator_id == teacher_id
                        || teacher_of(&test.course_id).as_ref() == Some(teacher_id)
                }
                TestScope::EnrolledStudent(student_id) => {
                    tables.enrollments.contains(&(test.course_id.clone(), student_id.clone()))
                }
            })
            .cloned()
            .collect();
        tests.sort_by_key(|test| (test.deadline, test.created_at));
        Ok(tests)
    }

    async fn add_question(
        &self,
        test_id: &str,
        question: NewQuestion,
    ) -> StoreResult<QuestionWithChoices> {
        let mut tables = self.tables.lock().unwrap();
        let position = tables
            .questions
            .iter()
            .filter(|row| row.test_id == test_id)
            .map(|row| row.position)
            .max()
            .unwrap_or(0)
            + 1;
        Ok(tables.push_question(test_id, position, question))
    }

    async fn find_question(&self, id: &str) -> StoreResult<Option<QuestionWithChoices>> {
        let tables = self.tables.lock().unwrap();
        let question = tables.questions.iter().find(|row| row.id == id).cloned();
        Ok(question.map(|question| tables.with_choices(question)))
    }

    async fn list_questions(
        &self,
        test_id: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<QuestionWithChoices>> {
        let tables = self.tables.lock().unwrap();
        let mut questions: Vec<Question> =
            tables.questions.iter().filter(|row| row.test_id == test_id).cloned().collect();
        questions.sort_by_key(|row| row.position);
        Ok(questions
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|question| tables.with_choices(question))
            .collect())
    }

    async fn count_questions(
        &self,
        test_id: &str,
        question_type: Option<QuestionType>,
    ) -> StoreResult<i64> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .questions
            .iter()
            .filter(|row| row.test_id == test_id)
            .filter(|row| question_type.map_or(true, |kind| row.question_type == kind))
            .count() as i64)
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn insert_attempt(&self, attempt: NewAttempt) -> StoreResult<AttemptInsert> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .attempts
            .iter()
            .find(|row| row.test_id == attempt.test_id && row.student_id == attempt.student_id)
        {
            return Ok(AttemptInsert::Existing(existing.clone()));
        }
        let row = TestAttempt {
            id: attempt.id,
            test_id: attempt.test_id,
            student_id: attempt.student_id,
            start_time: attempt.start_time,
            end_time: attempt.end_time,
            completed: false,
            score: None,
            scored_at: None,
        };
        tables.attempts.push(row.clone());
        Ok(AttemptInsert::Created(row))
    }

    async fn find_attempt(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<TestAttempt>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .attempts
            .iter()
            .find(|row| row.test_id == test_id && row.student_id == student_id)
            .cloned())
    }

    async fn close_attempt(
        &self,
        attempt: &TestAttempt,
        end_time: PrimitiveDateTime,
        answers: Vec<NewAnswer>,
    ) -> StoreResult<Option<TestAttempt>> {
        let mut tables = self.tables.lock().unwrap();
        let Some(row) =
            tables.attempts.iter_mut().find(|row| row.id == attempt.id && !row.completed)
        else {
            return Ok(None);
        };
        row.completed = true;
        row.end_time = end_time;
        let closed = row.clone();
        for answer in &answers {
            tables.write_answer(answer);
        }
        Ok(Some(closed))
    }

    async fn record_score(
        &self,
        attempt: &TestAttempt,
        score_of: &ScoreFn,
        scored_at: PrimitiveDateTime,
    ) -> StoreResult<Vec<ScoringRow>> {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.scoring_rows(&attempt.test_id, &attempt.student_id);
        let score = score_of(&rows);
        if let Some(row) = tables.attempts.iter_mut().find(|row| row.id == attempt.id) {
            row.score = Some(score);
            row.scored_at = Some(scored_at);
        }
        Ok(rows)
    }

    async fn list_finished_attempts(&self, test_id: &str) -> StoreResult<Vec<TestAttempt>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .attempts
            .iter()
            .filter(|row| row.test_id == test_id && row.completed)
            .cloned()
            .collect())
    }

    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<TestAttempt>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .attempts
            .iter()
            .filter(|row| !row.completed && row.end_time < now)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnswerRepository for MemoryStore {
    async fn upsert_answer(
        &self,
        attempt: &TestAttempt,
        answer: NewAnswer,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let mut tables = self.tables.lock().unwrap();
        let open = tables
            .attempts
            .iter()
            .any(|row| row.id == attempt.id && !row.completed && row.end_time >= now);
        if !open {
            return Ok(None);
        }
        Ok(Some(tables.write_answer(&answer)))
    }

    async fn find_answer(
        &self,
        question_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .answers
            .iter()
            .find(|row| row.question_id == question_id && row.student_id == student_id)
            .cloned())
    }

    async fn list_attempt_answers(&self, attempt_id: &str) -> StoreResult<Vec<AnswerSubmission>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.answers.iter().filter(|row| row.attempt_id == attempt_id).cloned().collect())
    }

    async fn set_teacher_score(
        &self,
        answer_id: &str,
        score: f64,
        graded_at: PrimitiveDateTime,
    ) -> StoreResult<Option<AnswerSubmission>> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.answers.iter_mut().find(|row| row.id == answer_id).map(|row| {
            row.teacher_score = Some(score);
            row.graded_at = Some(graded_at);
            row.clone()
        }))
    }

    async fn list_scoring_rows(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<ScoringRow>> {
        Ok(self.tables.lock().unwrap().scoring_rows(test_id, student_id))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
