use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use crate::core::config::{McqDenominator, ScoreCombination, ScoringSettings};
use crate::core::state::AppState;
use crate::db::models::{AnswerSubmission, TestAttempt};
use crate::db::types::QuestionType;
use crate::repositories::ScoringRow;
use crate::services::access::{self, Action, Identity};
use crate::services::cache::{self, score_key, stats_key};
use crate::services::errors::{ExamError, ExamResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScoreBreakdown {
    pub(crate) mcq_score: f64,
    pub(crate) teacher_score: f64,
    pub(crate) overall_score: f64,
    pub(crate) total_questions: i64,
    pub(crate) correct_count: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptResult {
    pub(crate) attempt: TestAttempt,
    pub(crate) breakdown: ScoreBreakdown,
}

/// Pure scoring over one student's submissions.
///
/// `test_mcq_questions` is only consulted when the denominator is the number
/// of multiple-choice questions on the test.
pub(crate) fn compute(
    rows: &[ScoringRow],
    policy: ScoringSettings,
    test_mcq_questions: i64,
) -> ScoreBreakdown {
    let mut answered_mcq = 0_i64;
    let mut correct_count = 0_i64;
    let mut teacher_score = 0.0_f64;

    for row in rows {
        match row.question_type {
            QuestionType::Mcq => {
                answered_mcq += 1;
                if row.is_correct == Some(true) {
                    correct_count += 1;
                }
            }
            QuestionType::Open => teacher_score += row.teacher_score.unwrap_or(0.0),
        }
    }

    let denominator = match policy.mcq_denominator {
        McqDenominator::Answered => answered_mcq,
        McqDenominator::TestQuestions => test_mcq_questions,
    };
    let mcq_score = if denominator > 0 {
        correct_count as f64 / denominator as f64 * 100.0
    } else {
        0.0
    };

    let overall_score = match policy.combination {
        ScoreCombination::Additive => mcq_score + teacher_score,
        ScoreCombination::McqOnly => mcq_score,
    };

    ScoreBreakdown {
        mcq_score,
        teacher_score,
        overall_score,
        total_questions: rows.len() as i64,
        correct_count,
    }
}

/// Scores from the stored submissions, bypassing the cache.
pub(crate) async fn score_attempt(
    state: &AppState,
    test_id: &str,
    student_id: &str,
) -> ExamResult<ScoreBreakdown> {
    let policy = state.settings().scoring();
    let rows = state.store().list_scoring_rows(test_id, student_id).await?;
    let test_mcq_questions = mcq_denominator_base(state, test_id, policy).await?;
    Ok(compute(&rows, policy, test_mcq_questions))
}

async fn mcq_denominator_base(
    state: &AppState,
    test_id: &str,
    policy: ScoringSettings,
) -> ExamResult<i64> {
    Ok(match policy.mcq_denominator {
        McqDenominator::Answered => 0,
        McqDenominator::TestQuestions => {
            state.store().count_questions(test_id, Some(QuestionType::Mcq)).await?
        }
    })
}

/// Memoized score for (test, student).
pub(crate) async fn cached_score(
    state: &AppState,
    test_id: &str,
    student_id: &str,
) -> ExamResult<ScoreBreakdown> {
    let key = score_key(test_id, student_id);
    if let Some(hit) = cache::get_json::<ScoreBreakdown>(state.cache(), &key).await {
        metrics::counter!("score_cache_hits_total").increment(1);
        return Ok(hit);
    }
    metrics::counter!("score_cache_misses_total").increment(1);

    let breakdown = score_attempt(state, test_id, student_id).await?;
    let ttl = Duration::from_secs(state.settings().cache().score_ttl_seconds);
    cache::put_json(state.cache(), &key, &breakdown, ttl).await;
    Ok(breakdown)
}

/// Scores a closed attempt, persists the score, then drops the cached
/// score and test statistics.
///
/// The store re-reads the submissions while holding the attempt lock, so
/// whichever settle commits last persists the freshest score.
pub(crate) async fn settle_attempt(
    state: &AppState,
    attempt: &TestAttempt,
    now: PrimitiveDateTime,
) -> ExamResult<ScoreBreakdown> {
    let policy = state.settings().scoring();
    let test_mcq_questions = mcq_denominator_base(state, &attempt.test_id, policy).await?;
    let score_of =
        move |rows: &[ScoringRow]| compute(rows, policy, test_mcq_questions).overall_score;
    let rows = state.store().record_score(attempt, &score_of, now).await?;
    let breakdown = compute(&rows, policy, test_mcq_questions);
    invalidate_scores(state, &attempt.test_id, &attempt.student_id).await;

    tracing::debug!(
        attempt_id = %attempt.id,
        test_id = %attempt.test_id,
        overall_score = breakdown.overall_score,
        "Attempt scored"
    );
    Ok(breakdown)
}

pub(crate) async fn invalidate_scores(state: &AppState, test_id: &str, student_id: &str) {
    cache::invalidate(state.cache(), &[score_key(test_id, student_id), stats_key(test_id)]).await;
}

/// The caller's own score for a finished attempt.
pub(crate) async fn get_overall_score(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
) -> ExamResult<ScoreBreakdown> {
    let test = state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::TakeTest, &resource)?;

    let attempt = state
        .store()
        .find_attempt(&test.id, &identity.user_id)
        .await?
        .filter(|attempt| attempt.completed)
        .ok_or(ExamError::NotFound("score"))?;

    cached_score(state, &attempt.test_id, &attempt.student_id).await
}

/// Every finished attempt of a test with its score.
pub(crate) async fn test_results(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
) -> ExamResult<Vec<AttemptResult>> {
    let test = state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::ReviewTest, &resource)?;

    let attempts = state.store().list_finished_attempts(&test.id).await?;
    let mut results = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        let breakdown = cached_score(state, &attempt.test_id, &attempt.student_id).await?;
        results.push(AttemptResult { attempt, breakdown });
    }
    Ok(results)
}

pub(crate) async fn grade_open_answer(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
    question_id: &str,
    student_id: &str,
    score: f64,
    now: PrimitiveDateTime,
) -> ExamResult<AnswerSubmission> {
    let test = state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::ReviewTest, &resource)?;

    let question = state
        .store()
        .find_question(question_id)
        .await?
        .filter(|found| found.question.test_id == test.id)
        .ok_or(ExamError::NotFound("question"))?;
    if question.question.question_type != QuestionType::Open {
        return Err(ExamError::NotOpenQuestion);
    }
    if !score.is_finite() || score < 0.0 {
        return Err(ExamError::InvalidPayload("score must be a non-negative number".to_string()));
    }

    let answer = state
        .store()
        .find_answer(&question.question.id, student_id)
        .await?
        .ok_or(ExamError::NotFound("answer"))?;
    let graded = state
        .store()
        .set_teacher_score(&answer.id, score, now)
        .await?
        .ok_or(ExamError::NotFound("answer"))?;

    match state.store().find_attempt(&test.id, student_id).await? {
        Some(attempt) if attempt.completed => {
            settle_attempt(state, &attempt, now).await?;
        }
        _ => invalidate_scores(state, &test.id, student_id).await,
    }

    metrics::counter!("answers_graded_total").increment(1);
    tracing::info!(
        test_id = %test.id,
        question_id = %question.question.id,
        student_id,
        grader_id = %identity.user_id,
        grader_role = identity.role.as_str(),
        score,
        "Open answer graded"
    );
    Ok(graded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, Fixture};

    fn row(question_type: QuestionType, is_correct: Option<bool>, teacher: Option<f64>) -> ScoringRow {
        ScoringRow { question_type, is_correct, teacher_score: teacher }
    }

    fn policy(combination: ScoreCombination, mcq_denominator: McqDenominator) -> ScoringSettings {
        ScoringSettings { combination, mcq_denominator }
    }

    #[test]
    fn one_of_two_mcq_correct_is_fifty() {
        let rows = [row(QuestionType::Mcq, Some(true), None), row(QuestionType::Mcq, Some(false), None)];
        let score = compute(&rows, policy(ScoreCombination::Additive, McqDenominator::Answered), 0);
        assert_eq!(score.mcq_score, 50.0);
        assert_eq!(score.overall_score, 50.0);
        assert_eq!(score.correct_count, 1);
        assert_eq!(score.total_questions, 2);
    }

    #[test]
    fn teacher_points_add_to_mcq_percentage() {
        let rows = [row(QuestionType::Mcq, Some(true), None), row(QuestionType::Open, None, Some(30.0))];
        let score = compute(&rows, policy(ScoreCombination::Additive, McqDenominator::Answered), 0);
        assert_eq!(score.mcq_score, 100.0);
        assert_eq!(score.teacher_score, 30.0);
        assert_eq!(score.overall_score, 130.0);
    }

    #[test]
    fn mcq_only_combination_ignores_teacher_points() {
        let rows = [row(QuestionType::Mcq, Some(true), None), row(QuestionType::Open, None, Some(30.0))];
        let score = compute(&rows, policy(ScoreCombination::McqOnly, McqDenominator::Answered), 0);
        assert_eq!(score.overall_score, 100.0);
        assert_eq!(score.teacher_score, 30.0);
    }

    #[test]
    fn no_mcq_answers_scores_zero_mcq() {
        let rows = [row(QuestionType::Open, None, None)];
        let score = compute(&rows, policy(ScoreCombination::Additive, McqDenominator::Answered), 0);
        assert_eq!(score.mcq_score, 0.0);
        assert_eq!(score.overall_score, 0.0);
    }

    #[test]
    fn question_denominator_counts_unanswered() {
        let rows = [row(QuestionType::Mcq, Some(true), None)];
        let answered = compute(&rows, policy(ScoreCombination::Additive, McqDenominator::Answered), 4);
        let questions =
            compute(&rows, policy(ScoreCombination::Additive, McqDenominator::TestQuestions), 4);
        assert_eq!(answered.mcq_score, 100.0);
        assert_eq!(questions.mcq_score, 25.0);
    }

    #[test]
    fn choice_missing_from_join_counts_as_incorrect() {
        let rows = [row(QuestionType::Mcq, None, None), row(QuestionType::Mcq, Some(true), None)];
        let score = compute(&rows, policy(ScoreCombination::Additive, McqDenominator::Answered), 0);
        assert_eq!(score.mcq_score, 50.0);
    }

    #[tokio::test]
    async fn grading_rescores_a_finished_attempt() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_mcq(0, true, now).await;
        fx.answer_open(1, "essay", now).await;
        fx.finish(now).await.expect("finish");

        let before = get_overall_score(&fx.state, &fx.student, &fx.test.id).await.expect("score");
        assert_eq!(before.overall_score, 100.0);

        grade_open_answer(
            &fx.state,
            &fx.teacher,
            &fx.test.id,
            &fx.questions[1].question.id,
            &fx.student.user_id,
            30.0,
            now,
        )
        .await
        .expect("grade");

        let after = get_overall_score(&fx.state, &fx.student, &fx.test.id).await.expect("score");
        assert_eq!(after.overall_score, 130.0);

        let attempt = fx.attempt().await.expect("attempt");
        assert_eq!(attempt.score, Some(130.0));
    }

    #[tokio::test]
    async fn settle_scores_the_submissions_present_when_it_writes() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_mcq(0, true, now).await;
        let essay = fx.answer_open(1, "essay", now).await;
        fx.finish(now).await.expect("finish");
        let snapshot = fx.attempt().await.expect("attempt");

        fx.state.store().set_teacher_score(&essay.id, 30.0, now).await.expect("grade");

        let breakdown = settle_attempt(&fx.state, &snapshot, now).await.expect("settle");
        assert_eq!(breakdown.overall_score, 130.0);
        assert_eq!(fx.attempt().await.expect("attempt").score, Some(130.0));
    }

    #[tokio::test]
    async fn concurrent_settle_and_grade_persist_the_latest_score() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_mcq(0, true, now).await;
        fx.answer_open(1, "essay", now).await;
        fx.finish(now).await.expect("finish");
        let snapshot = fx.attempt().await.expect("attempt");

        let (settled, graded) = tokio::join!(
            settle_attempt(&fx.state, &snapshot, now),
            grade_open_answer(
                &fx.state,
                &fx.teacher,
                &fx.test.id,
                &fx.questions[1].question.id,
                &fx.student.user_id,
                30.0,
                now,
            ),
        );
        settled.expect("settle");
        graded.expect("grade");

        let fresh = score_attempt(&fx.state, &fx.test.id, &fx.student.user_id).await.expect("score");
        assert_eq!(fresh.overall_score, 130.0);
        assert_eq!(fx.attempt().await.expect("attempt").score, Some(fresh.overall_score));
    }

    #[tokio::test]
    async fn grading_mcq_question_is_rejected() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_mcq(0, true, now).await;

        let err = grade_open_answer(
            &fx.state,
            &fx.teacher,
            &fx.test.id,
            &fx.questions[0].question.id,
            &fx.student.user_id,
            5.0,
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExamError::NotOpenQuestion));
    }

    #[tokio::test]
    async fn other_teachers_cannot_grade() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_open(1, "essay", now).await;
        let outsider = fx.extra_teacher().await;

        let err = grade_open_answer(
            &fx.state,
            &outsider,
            &fx.test.id,
            &fx.questions[1].question.id,
            &fx.student.user_id,
            5.0,
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExamError::Forbidden(access::DenyReason::NotOwner)));
    }

    #[tokio::test]
    async fn score_is_not_found_until_finished() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        let err = get_overall_score(&fx.state, &fx.student, &fx.test.id).await.unwrap_err();
        assert!(matches!(err, ExamError::NotFound("score")));
    }

    #[tokio::test]
    async fn overall_score_is_memoized_until_invalidated() {
        let fx = Fixture::new().await;
        let now = test_support::now();
        fx.start(now).await;
        fx.answer_mcq(0, true, now).await;
        fx.finish(now).await.expect("finish");

        let first = get_overall_score(&fx.state, &fx.student, &fx.test.id).await.expect("score");
        let key = score_key(&fx.test.id, &fx.student.user_id);
        assert!(fx.state.cache().get(&key).await.unwrap().is_some());

        invalidate_scores(&fx.state, &fx.test.id, &fx.student.user_id).await;
        assert!(fx.state.cache().get(&key).await.unwrap().is_none());

        let second = get_overall_score(&fx.state, &fx.student, &fx.test.id).await.expect("score");
        assert_eq!(first, second);
    }
}
