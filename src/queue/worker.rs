//! Background worker: polls for due tasks and dispatches them to registered
//! handlers under a per-task deadline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::{self, Job};
use crate::store::AppState;

/// Background tasks get their own deadline, independent of any request.
const TASK_DEADLINE: Duration = Duration::from_secs(5 * 60);

const CLAIM_BATCH_SIZE: i64 = 10;

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Handler = Arc<dyn Fn(AppState, Job) -> HandlerFuture + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, task_type: &'static str, handler: F) -> Self
    where
        F: Fn(AppState, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers
            .insert(task_type, Arc::new(move |state, job| Box::pin(handler(state, job))));
        self
    }

    fn get(&self, task_type: &str) -> Option<Handler> {
        self.handlers.get(task_type).cloned()
    }
}

/// Poll loop. Runs until the shutdown channel fires.
pub async fn run(
    state: AppState,
    registry: Registry,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) {
    tracing::info!("queue worker started");
    let poll_interval = Duration::from_millis(state.config.queue_poll_interval_ms);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("queue worker shutting down");
                break;
            }
            () = tokio::time::sleep(poll_interval) => {
                if let Err(e) = poll_once(&state, &registry).await {
                    tracing::error!(error = %e, "error polling job queue");
                }
            }
        }
    }
}

/// Claim one batch and spawn an execution task per job.
pub async fn poll_once(state: &AppState, registry: &Registry) -> anyhow::Result<()> {
    let batch = queue::claim_batch(&state.pool, CLAIM_BATCH_SIZE).await?;

    for job in batch {
        let Some(handler) = registry.get(&job.task_type) else {
            tracing::error!(job_id = %job.id, task_type = %job.task_type, "no handler registered");
            queue::mark_failed(&state.pool, &job, "no handler registered").await?;
            continue;
        };

        let state = state.clone();
        tokio::spawn(async move {
            execute(&state, handler, job).await;
        });
    }

    Ok(())
}

#[tracing::instrument(skip(state, handler, job), fields(job_id = %job.id, task_type = %job.task_type, attempt = job.attempts))]
async fn execute(state: &AppState, handler: Handler, job: Job) {
    let outcome = tokio::time::timeout(TASK_DEADLINE, handler(state.clone(), job.clone())).await;

    let result = match outcome {
        Ok(Ok(())) => queue::mark_succeeded(&state.pool, job.id).await,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "task attempt failed");
            queue::mark_failed(&state.pool, &job, &e.to_string()).await
        }
        Err(_) => {
            tracing::warn!("task deadline exceeded");
            queue::mark_failed(&state.pool, &job, "deadline exceeded").await
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "failed to record task outcome");
    }
}

/// Drain the queue inline until no due work remains. Test harnesses use this
/// instead of waiting on the poll loop.
pub async fn drain(state: &AppState, registry: &Registry) -> anyhow::Result<()> {
    loop {
        let batch = queue::claim_batch(&state.pool, CLAIM_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(());
        }
        for job in batch {
            let Some(handler) = registry.get(&job.task_type) else {
                queue::mark_failed(&state.pool, &job, "no handler registered").await?;
                continue;
            };
            match handler(state.clone(), job.clone()).await {
                Ok(()) => queue::mark_succeeded(&state.pool, job.id).await?,
                Err(e) => queue::mark_failed(&state.pool, &job, &e.to_string()).await?,
            }
        }
    }
}
