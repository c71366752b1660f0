//! Recurring work: cron-spec schedules that enqueue a task at each fire time.

use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;

use crate::queue::{self, EnqueueOpts};
use crate::store::AppState;

pub struct ScheduledTask {
    pub schedule: Schedule,
    pub task_type: &'static str,
    pub payload: serde_json::Value,
}

impl ScheduledTask {
    /// Parses a cron spec with seconds (e.g. `"0 0 * * * *"` = hourly).
    pub fn new(
        cron_spec: &str,
        task_type: &'static str,
        payload: serde_json::Value,
    ) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(cron_spec)
            .map_err(|e| anyhow::anyhow!("invalid cron spec {cron_spec:?}: {e}"))?;
        Ok(Self {
            schedule,
            task_type,
            payload,
        })
    }
}

/// Sleep-until-next-fire loop over a fixed set of schedules. Enqueued tasks
/// flow through the regular worker, so handlers keep their retry semantics.
pub async fn run(
    state: AppState,
    tasks: Vec<ScheduledTask>,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) {
    if tasks.is_empty() {
        return;
    }
    tracing::info!(schedules = tasks.len(), "scheduler started");

    loop {
        let now = Utc::now();
        let Some((wait, task)) = tasks
            .iter()
            .filter_map(|t| {
                let next = t.schedule.after(&now).next()?;
                Some(((next - now).to_std().ok()?, t))
            })
            .min_by_key(|(wait, _)| *wait)
        else {
            tracing::warn!("no upcoming fire times; scheduler exiting");
            return;
        };

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("scheduler shutting down");
                return;
            }
            () = tokio::time::sleep(wait) => {
                let result = queue::enqueue(
                    &state.pool,
                    task.task_type,
                    task.payload.clone(),
                    EnqueueOpts::default(),
                )
                .await;
                match result {
                    Ok(job_id) => {
                        tracing::info!(task_type = task.task_type, %job_id, "scheduled task enqueued");
                    }
                    Err(e) => {
                        tracing::error!(task_type = task.task_type, error = %e, "scheduled enqueue failed");
                    }
                }
            }
        }
    }
}
