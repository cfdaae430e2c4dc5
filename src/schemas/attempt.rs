use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use validator::Validate;

use crate::core::time::{format_primitive, remaining_seconds};
use crate::db::models::AnswerSubmission;
use crate::services::lifecycle::{AccessOutcome, AnswerPayload, PendingAnswer};
use crate::services::scoring::{AttemptResult, ScoreBreakdown};
use crate::services::statistics::TestStatistics;

#[derive(Debug, Serialize)]
pub(crate) struct AccessResponse {
    pub(crate) status: &'static str,
    pub(crate) detail: &'static str,
    pub(crate) end_time: String,
    pub(crate) remaining_seconds: i64,
}

impl AccessResponse {
    pub(crate) fn from_outcome(outcome: &AccessOutcome, now: PrimitiveDateTime) -> Self {
        let (status, detail) = match outcome {
            AccessOutcome::Started { .. } => ("started", "Test started"),
            AccessOutcome::AlreadyStarted { .. } => ("already_started", "Test already started"),
        };
        Self {
            status,
            detail,
            end_time: format_primitive(outcome.end_time()),
            remaining_seconds: remaining_seconds(now, outcome.end_time()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnswerRequest {
    #[serde(default)]
    #[serde(alias = "selectedChoiceId", alias = "selected_choice")]
    pub(crate) selected_choice_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "answerText")]
    pub(crate) answer_text: Option<String>,
}

impl AnswerRequest {
    pub(crate) fn into_payload(self) -> AnswerPayload {
        AnswerPayload { selected_choice_id: self.selected_choice_id, answer_text: self.answer_text }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinishAnswer {
    #[serde(alias = "questionId", alias = "question")]
    pub(crate) question_id: String,
    #[serde(flatten)]
    pub(crate) answer: AnswerRequest,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FinishRequest {
    #[serde(default)]
    pub(crate) answers: Vec<FinishAnswer>,
}

impl FinishRequest {
    pub(crate) fn into_pending(self) -> Vec<PendingAnswer> {
        self.answers
            .into_iter()
            .map(|item| PendingAnswer {
                question_id: item.question_id,
                payload: item.answer.into_payload(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_id: String,
    pub(crate) selected_choice_id: Option<String>,
    pub(crate) answer_text: Option<String>,
    pub(crate) teacher_score: Option<f64>,
    pub(crate) submitted_at: String,
    pub(crate) graded_at: Option<String>,
}

impl AnswerResponse {
    pub(crate) fn from_db(answer: AnswerSubmission) -> Self {
        Self {
            id: answer.id,
            question_id: answer.question_id,
            student_id: answer.student_id,
            attempt_id: answer.attempt_id,
            selected_choice_id: answer.selected_choice_id,
            answer_text: answer.answer_text,
            teacher_score: answer.teacher_score,
            submitted_at: format_primitive(answer.submitted_at),
            graded_at: answer.graded_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    #[validate(range(min = 0.0, message = "score must be non-negative"))]
    pub(crate) score: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScoreResponse {
    pub(crate) test_id: String,
    pub(crate) mcq_score: f64,
    pub(crate) teacher_score: f64,
    pub(crate) overall_score: f64,
    pub(crate) total_questions: i64,
    pub(crate) correct_count: i64,
}

impl ScoreResponse {
    pub(crate) fn new(test_id: String, breakdown: ScoreBreakdown) -> Self {
        Self {
            test_id,
            mcq_score: breakdown.mcq_score,
            teacher_score: breakdown.teacher_score,
            overall_score: breakdown.overall_score,
            total_questions: breakdown.total_questions,
            correct_count: breakdown.correct_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultResponse {
    pub(crate) attempt_id: String,
    pub(crate) student_id: String,
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    pub(crate) score: ScoreResponse,
    pub(crate) answers: Vec<AnswerResponse>,
}

impl ResultResponse {
    pub(crate) fn new(result: AttemptResult, answers: Vec<AnswerSubmission>) -> Self {
        let AttemptResult { attempt, breakdown } = result;
        Self {
            attempt_id: attempt.id,
            student_id: attempt.student_id,
            start_time: format_primitive(attempt.start_time),
            end_time: format_primitive(attempt.end_time),
            score: ScoreResponse::new(attempt.test_id, breakdown),
            answers: answers.into_iter().map(AnswerResponse::from_db).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatisticsResponse {
    pub(crate) test_id: String,
    pub(crate) average_score: f64,
    pub(crate) max_score: f64,
    pub(crate) min_score: f64,
    pub(crate) participant_count: i64,
}

impl StatisticsResponse {
    pub(crate) fn new(test_id: String, stats: TestStatistics) -> Self {
        Self {
            test_id,
            average_score: stats.average,
            max_score: stats.max,
            min_score: stats.min,
            participant_count: stats.participant_count,
        }
    }
}
