//! Attempt state machine: not started, in progress, finished.
//!
//! Expiry is checked lazily on every call, so a missed sweeper run never
//! leaves an attempt writable past its end time.

use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{AnswerSubmission, Test, TestAttempt};
use crate::db::types::QuestionType;
use crate::repositories::{AttemptInsert, NewAnswer, NewAttempt, QuestionWithChoices};
use crate::services::access::{self, Action, Identity};
use crate::services::errors::{ExamError, ExamResult};
use crate::services::scoring::{self, ScoreBreakdown};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AccessOutcome {
    Started { end_time: PrimitiveDateTime },
    AlreadyStarted { end_time: PrimitiveDateTime },
}

impl AccessOutcome {
    pub(crate) fn end_time(&self) -> PrimitiveDateTime {
        match self {
            AccessOutcome::Started { end_time } | AccessOutcome::AlreadyStarted { end_time } => {
                *end_time
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AnswerPayload {
    pub(crate) selected_choice_id: Option<String>,
    pub(crate) answer_text: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingAnswer {
    pub(crate) question_id: String,
    pub(crate) payload: AnswerPayload,
}

async fn load_for_taking(state: &AppState, identity: &Identity, test_id: &str) -> ExamResult<Test> {
    let test = state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::TakeTest, &resource)?;
    Ok(test)
}

pub(crate) async fn access_test(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    now: PrimitiveDateTime,
) -> ExamResult<AccessOutcome> {
    let test = load_for_taking(state, identity, test_id).await?;

    if now > test.deadline {
        return Err(ExamError::PastDeadline);
    }

    if let Some(existing) = state.store().find_attempt(&test.id, &identity.user_id).await? {
        return resume(state, existing, now).await;
    }

    let attempt = NewAttempt {
        id: Uuid::new_v4().to_string(),
        test_id: test.id.clone(),
        student_id: identity.user_id.clone(),
        start_time: now,
        end_time: now
            .checked_add(test.time_limit())
            .ok_or_else(|| ExamError::InvalidInput("test time limit is out of range".to_string()))?,
    };

    match state.store().insert_attempt(attempt).await? {
        AttemptInsert::Created(created) => {
            metrics::counter!("test_attempts_started_total").increment(1);
            tracing::info!(
                attempt_id = %created.id,
                test_id = %created.test_id,
                student_id = %created.student_id,
                "Test attempt started"
            );
            Ok(AccessOutcome::Started { end_time: created.end_time })
        }
        AttemptInsert::Existing(existing) => resume(state, existing, now).await,
    }
}

async fn resume(
    state: &AppState,
    attempt: TestAttempt,
    now: PrimitiveDateTime,
) -> ExamResult<AccessOutcome> {
    if attempt.completed {
        return Err(ExamError::AlreadyOver);
    }
    if now > attempt.end_time {
        expire_attempt(state, &attempt, now).await?;
        return Err(ExamError::AlreadyOver);
    }
    Ok(AccessOutcome::AlreadyStarted { end_time: attempt.end_time })
}

/// Finishes an attempt whose time ran out, keeping its original end time.
/// Returns `None` when another caller finished it first.
pub(crate) async fn expire_attempt(
    state: &AppState,
    attempt: &TestAttempt,
    now: PrimitiveDateTime,
) -> ExamResult<Option<ScoreBreakdown>> {
    let Some(closed) = state.store().close_attempt(attempt, attempt.end_time, Vec::new()).await?
    else {
        return Ok(None);
    };

    let breakdown = scoring::settle_attempt(state, &closed, now).await?;
    metrics::counter!("test_attempts_expired_total").increment(1);
    tracing::info!(
        attempt_id = %closed.id,
        test_id = %closed.test_id,
        student_id = %closed.student_id,
        "Test attempt expired"
    );
    Ok(Some(breakdown))
}

fn build_answer(
    question: &QuestionWithChoices,
    attempt: &TestAttempt,
    payload: AnswerPayload,
    now: PrimitiveDateTime,
) -> ExamResult<NewAnswer> {
    let (selected_choice_id, answer_text) = match question.question.question_type {
        QuestionType::Mcq => {
            let choice_id = payload.selected_choice_id.ok_or_else(|| {
                ExamError::InvalidPayload("multiple-choice answers need selected_choice_id".into())
            })?;
            if payload.answer_text.is_some() {
                return Err(ExamError::InvalidPayload(
                    "multiple-choice answers cannot carry answer_text".into(),
                ));
            }
            if !question.choices.iter().any(|choice| choice.id == choice_id) {
                return Err(ExamError::InvalidPayload(
                    "selected choice does not belong to this question".into(),
                ));
            }
            (Some(choice_id), None)
        }
        QuestionType::Open => {
            if payload.selected_choice_id.is_some() {
                return Err(ExamError::InvalidPayload(
                    "open-ended answers cannot select a choice".into(),
                ));
            }
            let text = payload
                .answer_text
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| ExamError::InvalidPayload("answer_text must not be empty".into()))?;
            (None, Some(text))
        }
    };

    Ok(NewAnswer {
        id: Uuid::new_v4().to_string(),
        question_id: question.question.id.clone(),
        student_id: attempt.student_id.clone(),
        attempt_id: attempt.id.clone(),
        selected_choice_id,
        answer_text,
        submitted_at: now,
    })
}

async fn question_of_test(
    state: &AppState,
    test: &Test,
    question_id: &str,
) -> ExamResult<QuestionWithChoices> {
    state
        .store()
        .find_question(question_id)
        .await?
        .filter(|found| found.question.test_id == test.id)
        .ok_or(ExamError::NotFound("question"))
}

/// Loads the caller's attempt and enforces that it is still open.
async fn open_attempt(
    state: &AppState,
    test: &Test,
    identity: &Identity,
    now: PrimitiveDateTime,
) -> ExamResult<TestAttempt> {
    let attempt = state
        .store()
        .find_attempt(&test.id, &identity.user_id)
        .await?
        .ok_or(ExamError::TestNotActive)?;
    if attempt.completed {
        return Err(ExamError::TestNotActive);
    }
    if now > attempt.end_time {
        expire_attempt(state, &attempt, now).await?;
        return Err(ExamError::TimeExpired);
    }
    Ok(attempt)
}

pub(crate) async fn submit_answer(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    question_id: &str,
    payload: AnswerPayload,
    now: PrimitiveDateTime,
) -> ExamResult<AnswerSubmission> {
    let test = load_for_taking(state, identity, test_id).await?;
    let question = question_of_test(state, &test, question_id).await?;
    let attempt = open_attempt(state, &test, identity, now).await?;
    let answer = build_answer(&question, &attempt, payload, now)?;

    let Some(saved) = state.store().upsert_answer(&attempt, answer, now).await? else {
        // Closed between the check above and the write.
        return Err(ExamError::TestNotActive);
    };

    metrics::counter!("answers_submitted_total").increment(1);
    tracing::debug!(
        attempt_id = %attempt.id,
        question_id = %saved.question_id,
        "Answer recorded"
    );
    Ok(saved)
}

pub(crate) async fn finish_test(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    answers: Vec<PendingAnswer>,
    now: PrimitiveDateTime,
) -> ExamResult<ScoreBreakdown> {
    let test = load_for_taking(state, identity, test_id).await?;

    let attempt = state
        .store()
        .find_attempt(&test.id, &identity.user_id)
        .await?
        .ok_or(ExamError::TestNotActive)?;
    if attempt.completed {
        return Err(ExamError::AlreadyFinished);
    }
    if now > attempt.end_time {
        expire_attempt(state, &attempt, now).await?;
        return Err(ExamError::TimeExpired);
    }

    let mut pending = Vec::with_capacity(answers.len());
    for answer in answers {
        let question = question_of_test(state, &test, &answer.question_id).await?;
        pending.push(build_answer(&question, &attempt, answer.payload, now)?);
    }

    let end_time = now.min(attempt.end_time);
    let Some(closed) = state.store().close_attempt(&attempt, end_time, pending).await? else {
        return Err(ExamError::AlreadyFinished);
    };

    let breakdown = scoring::settle_attempt(state, &closed, now).await?;
    metrics::counter!("test_attempts_finished_total").increment(1);
    tracing::info!(
        attempt_id = %closed.id,
        test_id = %closed.test_id,
        student_id = %closed.student_id,
        overall_score = breakdown.overall_score,
        "Test attempt finished"
    );
    Ok(breakdown)
}
