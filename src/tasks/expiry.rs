//! Background sweep that finishes attempts whose time ran out.
//!
//! Lazy expiry in the lifecycle service stays authoritative; this only keeps
//! scores and statistics fresh for students who never come back.

use anyhow::{Context, Result};
use time::PrimitiveDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::services::lifecycle;

/// One pass over overdue attempts. Returns how many this pass closed.
pub(crate) async fn sweep_expired(state: &AppState, now: PrimitiveDateTime) -> Result<usize> {
    let batch = state.settings().exam().expiry_sweep_batch;
    let overdue = state
        .store()
        .list_overdue_attempts(now, batch)
        .await
        .context("Failed to fetch overdue attempts")?;

    let mut closed = 0;
    for attempt in &overdue {
        match lifecycle::expire_attempt(state, attempt, now).await {
            Ok(Some(_)) => closed += 1,
            Ok(None) => {}
            Err(err) => tracing::error!(
                attempt_id = %attempt.id,
                error = %err,
                "Failed to expire attempt"
            ),
        }
    }

    if closed > 0 {
        tracing::info!(closed, "Expired overdue attempts");
    }
    Ok(closed)
}

/// Starts the sweep loop, or nothing when the interval is zero.
pub(crate) fn spawn(state: AppState, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
    let seconds = state.settings().exam().expiry_sweep_interval_seconds;
    if seconds == 0 {
        tracing::info!("Expiry sweeper disabled");
        return None;
    }
    Some(tokio::spawn(expiry_loop(state, Duration::from_secs(seconds), shutdown)))
}

async fn expiry_loop(state: AppState, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = sweep_expired(&state, primitive_now_utc()).await {
                    tracing::error!(error = %err, "sweep_expired failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration as TimeDuration;

    use super::*;
    use crate::services::cache::stats_key;
    use crate::test_support::{now, Fixture};

    #[tokio::test]
    async fn sweep_closes_overdue_attempts_with_original_end_time() {
        let fixture = Fixture::new().await;
        let start = now();
        fixture.start(start).await;
        fixture.answer_mcq(0, true, start).await;

        let later = start + fixture.test.time_limit() + TimeDuration::minutes(1);
        let closed = sweep_expired(&fixture.state, later).await.expect("sweep");

        assert_eq!(closed, 1);
        let attempt = fixture.attempt().await.expect("attempt");
        assert!(attempt.completed);
        assert_eq!(attempt.end_time, start + fixture.test.time_limit());
        assert_eq!(attempt.score, Some(100.0));
        assert!(fixture.cache.deleted_keys().contains(&stats_key(&fixture.test.id)));
    }

    #[tokio::test]
    async fn sweep_ignores_attempts_still_running() {
        let fixture = Fixture::new().await;
        let start = now();
        fixture.start(start).await;

        let closed = sweep_expired(&fixture.state, start + TimeDuration::minutes(5))
            .await
            .expect("sweep");

        assert_eq!(closed, 0);
        assert!(!fixture.attempt().await.expect("attempt").completed);
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let fixture = Fixture::new().await;
        let (tx, rx) = watch::channel(false);
        let handle =
            tokio::spawn(expiry_loop(fixture.state.clone(), Duration::from_millis(10), rx));

        tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits")
            .expect("join");
    }
}
