mod memory;

use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
};
use time::{Duration, PrimitiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::core::{
    config::Settings, redis::RedisHandle, security, state::AppState, time::primitive_now_utc,
};
use crate::db::models::{AnswerSubmission, Course, Test, TestAttempt, User};
use crate::db::types::{QuestionType, UserRole};
use crate::repositories::{NewUser, QuestionWithChoices, Store};
use crate::services::access::Identity;
use crate::services::cache::{Cache, CacheError, MemoryCache};
use crate::services::catalog::{self, ChoiceDraft, QuestionDraft, TestDraft};
use crate::services::errors::ExamResult;
use crate::services::lifecycle::{self, AccessOutcome, AnswerPayload};
use crate::services::scoring::ScoreBreakdown;

pub(crate) use memory::MemoryStore;

const TEST_SECRET_KEY: &str = "test-secret";
/// Argon2 is slow; fixture users that never log in get a placeholder.
const UNUSABLE_PASSWORD_HASH: &str = "!";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAM_ENV", "test");
    std::env::set_var("EXAM_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("CACHE_BACKEND", "memory");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "1");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "API_V1_STR",
        "STATS_CACHE_TTL_SECONDS",
        "SCORE_CACHE_TTL_SECONDS",
        "SCORE_COMBINATION",
        "SCORE_MCQ_DENOMINATOR",
        "FIRST_ADMIN_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) async fn test_settings() -> Settings {
    let _guard = env_lock().await;
    set_test_env();
    Settings::load().expect("settings")
}

/// Wall-clock "now" truncated to whole seconds so comparisons stay exact.
pub(crate) fn now() -> PrimitiveDateTime {
    let now = primitive_now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

/// `MemoryCache` that also records deletes.
#[derive(Default)]
pub(crate) struct RecordingCache {
    inner: MemoryCache,
    deleted: StdMutex<Vec<String>>,
}

impl RecordingCache {
    pub(crate) fn deletes(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub(crate) fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: StdDuration) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }
}

pub(crate) fn build_state(settings: Settings, store: Arc<MemoryStore>, cache: Arc<RecordingCache>) -> AppState {
    let redis = RedisHandle::new(settings.redis().redis_url());
    AppState::new(settings, store, cache, redis)
}

pub(crate) async fn insert_user(
    store: &dyn Store,
    username: &str,
    role: UserRole,
    password: Option<&str>,
) -> User {
    let hashed_password = match password {
        Some(password) => security::hash_password(password).expect("hash password"),
        None => UNUSABLE_PASSWORD_HASH.to_string(),
    };
    store
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            hashed_password,
            role,
            is_active: true,
            created_at: primitive_now_utc(),
        })
        .await
        .expect("insert user")
        .expect("username is free")
}

pub(crate) fn identity(user: &User) -> Identity {
    Identity { user_id: user.id.clone(), role: user.role }
}

/// A course with one enrolled student and a test of three questions:
/// MCQ, open-ended, MCQ. Each MCQ has a correct first choice and a wrong second one.
pub(crate) struct Fixture {
    pub(crate) state: AppState,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) cache: Arc<RecordingCache>,
    pub(crate) admin: Identity,
    pub(crate) teacher: Identity,
    pub(crate) student: Identity,
    pub(crate) course: Course,
    pub(crate) test: Test,
    pub(crate) questions: Vec<QuestionWithChoices>,
}

fn mcq(text: &str) -> QuestionDraft {
    QuestionDraft {
        question_text: text.to_string(),
        question_type: QuestionType::Mcq,
        choices: vec![
            ChoiceDraft { choice_text: "right".to_string(), is_correct: true },
            ChoiceDraft { choice_text: "wrong".to_string(), is_correct: false },
        ],
    }
}

impl Fixture {
    pub(crate) async fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(RecordingCache::default());
        let state = build_state(test_settings().await, store.clone(), cache.clone());
        let now = now();

        let admin = identity(&insert_user(store.as_ref(), "admin", UserRole::Admin, None).await);
        let teacher =
            identity(&insert_user(store.as_ref(), "teacher", UserRole::Teacher, None).await);
        let student =
            identity(&insert_user(store.as_ref(), "student", UserRole::Student, None).await);

        let course = catalog::create_course(&state, &teacher, "Algebra".to_string(), None, now)
            .await
            .expect("course");
        catalog::enroll_student(&state, &admin, &course.id, &student.user_id, now)
            .await
            .expect("enroll");

        let draft = TestDraft {
            course_id: course.id.clone(),
            title: "Midterm".to_string(),
            time_limit_seconds: 30 * 60,
            deadline: now + Duration::days(1),
            questions: vec![
                mcq("2 + 2 = ?"),
                QuestionDraft {
                    question_text: "Prove it".to_string(),
                    question_type: QuestionType::Open,
                    choices: Vec::new(),
                },
                mcq("3 * 3 = ?"),
            ],
        };
        let test = catalog::create_test(&state, &teacher, draft, now).await.expect("test");
        let (questions, _) =
            catalog::list_questions(&state, &teacher, &test.id, 1, 100).await.expect("questions");

        Self { state, store, cache, admin, teacher, student, course, test, questions }
    }

    pub(crate) async fn extra_teacher(&self) -> Identity {
        let name = format!("teacher-{}", Uuid::new_v4());
        identity(&insert_user(self.store.as_ref(), &name, UserRole::Teacher, None).await)
    }

    pub(crate) async fn extra_student(&self, enrolled: bool) -> Identity {
        let name = format!("student-{}", Uuid::new_v4());
        let student =
            identity(&insert_user(self.store.as_ref(), &name, UserRole::Student, None).await);
        if enrolled {
            catalog::enroll_student(&self.state, &self.admin, &self.course.id, &student.user_id, now())
                .await
                .expect("enroll");
        }
        student
    }

    pub(crate) fn mcq_payload(&self, index: usize, correct: bool) -> AnswerPayload {
        let choice = self.questions[index]
            .choices
            .iter()
            .find(|choice| choice.is_correct == correct)
            .expect("choice");
        AnswerPayload { selected_choice_id: Some(choice.id.clone()), answer_text: None }
    }

    pub(crate) async fn start(&self, now: PrimitiveDateTime) -> AccessOutcome {
        lifecycle::access_test(&self.state, &self.student, &self.test.id, now)
            .await
            .expect("access test")
    }

    pub(crate) async fn answer_mcq(
        &self,
        index: usize,
        correct: bool,
        now: PrimitiveDateTime,
    ) -> AnswerSubmission {
        lifecycle::submit_answer(
            &self.state,
            &self.student,
            &self.test.id,
            &self.questions[index].question.id,
            self.mcq_payload(index, correct),
            now,
        )
        .await
        .expect("submit mcq answer")
    }

    pub(crate) async fn answer_open(
        &self,
        index: usize,
        text: &str,
        now: PrimitiveDateTime,
    ) -> AnswerSubmission {
        lifecycle::submit_answer(
            &self.state,
            &self.student,
            &self.test.id,
            &self.questions[index].question.id,
            AnswerPayload { selected_choice_id: None, answer_text: Some(text.to_string()) },
            now,
        )
        .await
        .expect("submit open answer")
    }

    pub(crate) async fn finish(&self, now: PrimitiveDateTime) -> ExamResult<ScoreBreakdown> {
        lifecycle::finish_test(&self.state, &self.student, &self.test.id, Vec::new(), now).await
    }

    pub(crate) async fn attempt(&self) -> Option<TestAttempt> {
        self.state
            .store()
            .find_attempt(&self.test.id, &self.student.user_id)
            .await
            .expect("attempt")
    }

    pub(crate) fn token_for(&self, identity: &Identity) -> String {
        bearer_token(identity, self.state.settings())
    }
}

pub(crate) fn bearer_token(identity: &Identity, settings: &Settings) -> String {
    security::create_access_token(&identity.user_id, identity.role, settings.security(), None)
        .expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
