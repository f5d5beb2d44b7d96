//! Background job submission and an in-process worker
//!
//! Scans can take minutes, so callers may hand them to a [`TaskQueue`] instead
//! of running them inline. The worker makes one attempt per delivered job and
//! logs failures. Redelivery, if any, is the transport's business; scan and
//! sync jobs are safe to run more than once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{FootprintError, Result};
use crate::models::OwnerId;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Scan { owner: OwnerId },
    Sync { owner: OwnerId },
}

impl Job {
    pub fn owner(&self) -> OwnerId {
        match self {
            Job::Scan { owner } | Job::Sync { owner } => *owner,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Scan { .. } => "scan",
            Job::Sync { .. } => "sync",
        }
    }
}

/// A job as delivered to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: JobId,
    pub job: Job,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, job: Job) -> Result<JobId>;
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

/// Bounded in-process queue; `submit` waits when the worker falls behind
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelQueue {
    /// Create a queue and the receiving end to hand to a [`Worker`]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn submit(&self, job: Job) -> Result<JobId> {
        let id = Uuid::new_v4();
        self.tx
            .send(Envelope { id, job })
            .await
            .map_err(|_| FootprintError::Storage("job queue is closed".to_string()))?;
        info!("Queued {} job {} for owner {}", job.kind(), id, job.owner());
        Ok(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub failed: usize,
}

pub struct Worker<H> {
    rx: mpsc::Receiver<Envelope>,
    handler: H,
}

impl<H: JobHandler> Worker<H> {
    pub fn new(rx: mpsc::Receiver<Envelope>, handler: H) -> Self {
        Self { rx, handler }
    }

    /// Drain the queue until every sender is dropped
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(envelope) = self.rx.recv().await {
            let Envelope { id, job } = envelope;
            info!("Running {} job {} for owner {}", job.kind(), id, job.owner());

            match self.handler.handle(job).await {
                Ok(()) => info!("Job {} finished", id),
                Err(e) => {
                    stats.failed += 1;
                    warn!("Job {} failed: {}", id, e);
                }
            }
            stats.processed += 1;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default, Clone)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Job>>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: Job) -> Result<()> {
            self.seen.lock().await.push(job);
            match job {
                Job::Sync { owner: 13 } => Err(FootprintError::Timeout(20)),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_runs_jobs_in_order_and_survives_failures() {
        let (queue, rx) = ChannelQueue::new(8);
        let recorder = Recorder::default();
        let worker = tokio::spawn(Worker::new(rx, recorder.clone()).run());

        let a = queue.submit(Job::Scan { owner: 1 }).await.unwrap();
        let b = queue.submit(Job::Sync { owner: 13 }).await.unwrap();
        queue.submit(Job::Sync { owner: 2 }).await.unwrap();
        assert_ne!(a, b);
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, WorkerStats { processed: 3, failed: 1 });
        assert_eq!(
            *recorder.seen.lock().await,
            vec![
                Job::Scan { owner: 1 },
                Job::Sync { owner: 13 },
                Job::Sync { owner: 2 }
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_after_worker_gone_fails() {
        let (queue, rx) = ChannelQueue::new(1);
        drop(rx);
        let err = queue.submit(Job::Scan { owner: 1 }).await.unwrap_err();
        assert!(matches!(err, FootprintError::Storage(_)));
    }

    #[test]
    fn test_job_serialization() {
        let json = serde_json::to_string(&Job::Scan { owner: 4 }).unwrap();
        assert_eq!(json, r#"{"kind":"scan","owner":4}"#);
    }
}
