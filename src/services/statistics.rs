use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::state::AppState;
use crate::services::access::{self, Action, Identity};
use crate::services::cache::{self, stats_key};
use crate::services::errors::{ExamError, ExamResult};
use crate::services::scoring;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TestStatistics {
    pub(crate) average: f64,
    pub(crate) max: f64,
    pub(crate) min: f64,
    pub(crate) participant_count: i64,
}

pub(crate) fn aggregate(scores: &[f64]) -> TestStatistics {
    if scores.is_empty() {
        return TestStatistics { average: 0.0, max: 0.0, min: 0.0, participant_count: 0 };
    }

    let sum: f64 = scores.iter().sum();
    let max = scores.iter().copied().fold(f64::MIN, f64::max);
    let min = scores.iter().copied().fold(f64::MAX, f64::min);

    TestStatistics {
        average: sum / scores.len() as f64,
        max,
        min,
        participant_count: scores.len() as i64,
    }
}

pub(crate) async fn get_test_statistics(
    state: &AppState,
    identity: &Identity,
    test_id: &str,
) -> ExamResult<TestStatistics> {
    let test = state.store().find_test(test_id).await?.ok_or(ExamError::NotFound("test"))?;
    let resource = access::test_resource(state.store(), identity, &test).await?;
    access::ensure(identity, Action::ReviewTest, &resource)?;

    let key = stats_key(&test.id);
    if let Some(hit) = cache::get_json::<TestStatistics>(state.cache(), &key).await {
        metrics::counter!("stats_cache_hits_total").increment(1);
        return Ok(hit);
    }
    metrics::counter!("stats_cache_misses_total").increment(1);

    let attempts = state.store().list_finished_attempts(&test.id).await?;
    let mut scores = Vec::with_capacity(attempts.len());
    for attempt in &attempts {
        let breakdown = scoring::cached_score(state, &attempt.test_id, &attempt.student_id).await?;
        scores.push(breakdown.overall_score);
    }

    let stats = aggregate(&scores);
    let ttl = Duration::from_secs(state.settings().cache().stats_ttl_seconds);
    cache::put_json(state.cache(), &key, &stats, ttl).await;
    Ok(stats)
}
