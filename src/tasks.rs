use crate::directory::Recipient;
use crate::notify::{FanoutJob, NotificationSink, fan_out};
use crate::push::PushGateway;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tracing::{error, info, warn};

/// All fan-outs queued by one import call, plus the recipient snapshot that
/// was fixed at the start of that batch.
pub struct FanoutBatch {
    pub jobs: Vec<FanoutJob>,
    pub recipients: Arc<Vec<Recipient>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub jobs_settled: usize,
    pub jobs_failed: usize,
    pub persisted: usize,
    pub pushed: usize,
}

/// Executes queued fan-out batches after the import response has gone out.
/// One worker drains the channel; a queued batch always runs to completion.
#[derive(Clone)]
pub struct FanoutRunner {
    tx: mpsc::Sender<FanoutBatch>,
}

impl FanoutRunner {
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        push: Arc<dyn PushGateway>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<FanoutBatch>(queue_capacity_from_env());

        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let outcome = run_batch(batch, &sink, &push).await;
                // Observability only; no caller ever sees these numbers.
                info!(
                    target = "autolist.notify",
                    jobs = outcome.jobs_settled,
                    failed = outcome.jobs_failed,
                    persisted = outcome.persisted,
                    pushed = outcome.pushed,
                    "fanout_batch_settled",
                );
                crate::metrics::fanout_settled(outcome.jobs_settled, outcome.jobs_failed);
            }
        });

        (Self { tx }, handle)
    }

    /// Hand a batch to the worker without waiting for any of it to run. A
    /// full or closed queue is logged and dropped; it never fails the
    /// request that queued the work.
    pub async fn enqueue(&self, batch: FanoutBatch) {
        if batch.jobs.is_empty() {
            return;
        }
        let queued = batch.jobs.len();
        if self.tx.send(batch).await.is_err() {
            warn!(
                target = "autolist.notify",
                jobs = queued,
                "fanout_worker_unavailable",
            );
        }
    }
}

/// Run every fan-out of one batch concurrently and wait for all of them to
/// settle. No job's failure cancels or blocks another.
pub async fn run_batch(
    batch: FanoutBatch,
    sink: &Arc<dyn NotificationSink>,
    push: &Arc<dyn PushGateway>,
) -> BatchOutcome {
    let mut set = JoinSet::new();
    for job in batch.jobs {
        let recipients = batch.recipients.clone();
        let sink = sink.clone();
        let push = push.clone();
        set.spawn(async move { fan_out(&job, &recipients, &sink, &push).await });
    }

    let mut outcome = BatchOutcome::default();
    while let Some(settled) = set.join_next().await {
        match settled {
            Ok(report) => {
                outcome.jobs_settled += 1;
                outcome.persisted += report.persisted;
                outcome.pushed += report.pushed;
            }
            Err(err) => {
                outcome.jobs_failed += 1;
                error!(
                    target = "autolist.notify",
                    error = %err,
                    "fanout_job_panicked",
                );
            }
        }
    }
    outcome
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
