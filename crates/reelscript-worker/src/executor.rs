//! Job executor: consumes the queue under bounded concurrency, enforces the
//! queue-wide start rate, heartbeats stream ownership for long jobs,
//! retries with exponential backoff, and delivers the deterministic
//! fallback when the last attempt fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reelscript_breaker::{services, BreakerMirror, BreakerRegistry, CircuitOpen, FailureTracker};
use reelscript_media::DownloadConfig;
use reelscript_messaging::MessagingClient;
use reelscript_models::{fallback_script, JobId, JobStatus};
use reelscript_queue::{
    EventChannel, JobQueue, KvStore, QueueEvent, ScriptJob, SessionStore,
};
use reelscript_store::{
    AnalysisRepository, DatasetRepository, JobRepository, ScriptRepository, StoreClient,
};
use reelscript_storage::R2Client;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::gemini::GeminiClient;
use crate::metrics;
use crate::pipeline::{self, PipelineServices};
use crate::render::CardRenderer;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    jobs: JobRepository,
    analyses: AnalysisRepository,
    events: Arc<EventChannel>,
    pipeline: Arc<PipelineServices>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Wire the executor and every downstream service from the environment.
    pub async fn new(config: WorkerConfig, queue: JobQueue) -> WorkerResult<Self> {
        let store = StoreClient::from_env().await?;
        let kv = KvStore::from_env()?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let events = EventChannel::new(&redis_url)?;

        let breakers = Arc::new(
            BreakerRegistry::with_default_services().with_mirror(BreakerMirror::new(kv.clone())),
        );
        breakers.hydrate_from_mirror().await;

        let messaging = Arc::new(
            MessagingClient::from_env()
                .map_err(|e| WorkerError::config_error(e.to_string()))?,
        );
        let storage =
            R2Client::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?;

        let pipeline = PipelineServices {
            config: config.clone(),
            download: DownloadConfig::from_env(),
            scripts: ScriptRepository::new(store.clone()),
            analyses: AnalysisRepository::new(store.clone()),
            dataset: DatasetRepository::new(store.clone()),
            sessions: SessionStore::new(kv),
            storage,
            messaging,
            gemini: GeminiClient::new()?,
            renderer: CardRenderer::from_env()?,
            breakers,
        };

        let job_semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Ok(Self {
            config,
            queue: Arc::new(queue),
            jobs: JobRepository::new(store.clone()),
            analyses: AnalysisRepository::new(store),
            events: Arc::new(events),
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            consumer_name,
        })
    }

    /// Request a graceful stop.
    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            concurrency = self.config.concurrency,
            "Starting job executor"
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        self.spawn_stall_reclaimer();
        self.spawn_ttl_sweeper();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(Duration::from_secs(60), self.drain()).await;
        info!("Job executor stopped");
        Ok(())
    }

    async fn drain(&self) {
        // All permits returned means no job tasks remain.
        let _ = self
            .job_semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
    }

    /// Periodically claim pending messages from lapsed workers.
    fn spawn_stall_reclaimer(&self) {
        let queue = Arc::clone(&self.queue);
        let events = Arc::clone(&self.events);
        let executor = self.clone_for_tasks();
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            let mut claim_failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() { break; }
                    }
                    _ = interval.tick() => {
                        match queue.claim_stalled(&consumer_name, 5).await {
                            Ok(claimed) if !claimed.is_empty() => {
                                claim_failures.record_success();
                                info!("Reclaimed {} stalled jobs", claimed.len());
                                for (message_id, job) in claimed {
                                    let event = QueueEvent::Stalled {
                                        job_id: job.job_id.clone(),
                                        reclaimed_by: consumer_name.clone(),
                                    };
                                    if let Err(e) = events.publish(&event).await {
                                        debug!("Event publish failed (ignored): {}", e);
                                    }
                                    executor.spawn_job(message_id, job).await;
                                }
                            }
                            Ok(_) => claim_failures.record_success(),
                            Err(e) => {
                                if claim_failures.record_failure() {
                                    warn!("Stall reclaim failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Hourly sweep of expired terminal jobs and stale analyses.
    fn spawn_ttl_sweeper(&self) {
        let jobs = self.jobs.clone();
        let analyses = self.analyses.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            let mut sweep_failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() { break; }
                    }
                    _ = interval.tick() => {
                        let jobs_result = jobs.sweep_expired().await;
                        let analyses_result = analyses.sweep_expired().await;
                        match (&jobs_result, &analyses_result) {
                            (Ok(_), Ok(_)) => sweep_failures.record_success(),
                            _ => {
                                if sweep_failures.record_failure() {
                                    if let Err(e) = &jobs_result {
                                        warn!("Job sweep failed: {}", e);
                                    }
                                    if let Err(e) = &analyses_result {
                                        warn!("Analysis sweep failed: {}", e);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let consumed = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        for (message_id, job) in consumed {
            self.spawn_job(message_id, job).await;
        }
        Ok(())
    }

    fn clone_for_tasks(&self) -> TaskSpawner {
        TaskSpawner {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            jobs: self.jobs.clone(),
            events: Arc::clone(&self.events),
            pipeline: Arc::clone(&self.pipeline),
            job_semaphore: Arc::clone(&self.job_semaphore),
            consumer_name: self.consumer_name.clone(),
        }
    }

    async fn spawn_job(&self, message_id: String, job: ScriptJob) {
        self.clone_for_tasks().spawn_job(message_id, job).await;
    }
}

/// The per-job slice of the executor, cloneable into spawned tasks.
#[derive(Clone)]
struct TaskSpawner {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    jobs: JobRepository,
    events: Arc<EventChannel>,
    pipeline: Arc<PipelineServices>,
    job_semaphore: Arc<Semaphore>,
    consumer_name: String,
}

impl TaskSpawner {
    async fn spawn_job(&self, message_id: String, job: ScriptJob) {
        let permit = match Arc::clone(&self.job_semaphore).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            this.execute_job(message_id, job).await;
        });
    }

    async fn execute_job(&self, message_id: String, job: ScriptJob) {
        // Queue-wide start limiter, independent of per-user quotas. The
        // message stays pending (heartbeated below) while we wait.
        loop {
            match self.queue.try_acquire_start_slot().await {
                Ok(true) => break,
                Ok(false) => {
                    debug!(job_id = %job.job_id, "Start slot exhausted, waiting");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(e) => {
                    warn!("Start limiter unavailable, proceeding: {}", e);
                    break;
                }
            }
        }

        let job_id = JobId::from_string(job.job_id.clone());
        let started = Instant::now();
        info!(job_id = %job.job_id, request_hash = %job.request_hash, "Executing job");

        let attempt = self.queue.get_retry_count(&job.job_id).await.unwrap_or(0) + 1;
        let mut attempt_fields = std::collections::HashMap::new();
        attempt_fields.insert(
            "attempts".to_string(),
            reelscript_store::ToDocValue::to_doc_value(&attempt),
        );
        match self.jobs.transition(&job_id, JobStatus::Processing, attempt_fields).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Already terminal (e.g. a duplicate delivery after
                // completion): drop the message.
                info!(job_id = %job.job_id, "Job already terminal, acking duplicate delivery");
                self.queue.ack(&message_id).await.ok();
                return;
            }
            Err(e) => warn!(job_id = %job.job_id, "Job transition failed (continuing): {}", e),
        }

        let progress = QueueEvent::Progress {
            job_id: job.job_id.clone(),
            stage: "processing".to_string(),
        };
        self.events.publish(&progress).await.ok();

        // Heartbeat: keep stream ownership fresh while the job runs.
        let heartbeat = {
            let queue = Arc::clone(&self.queue);
            let consumer = self.consumer_name.clone();
            let message = message_id.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let mut heartbeat_failures = FailureTracker::new(3);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match queue.refresh_visibility(&consumer, &message).await {
                        Ok(()) => heartbeat_failures.record_success(),
                        Err(e) => {
                            if heartbeat_failures.record_failure() {
                                debug!("Heartbeat refresh failed: {}", e);
                            }
                        }
                    }
                }
            })
        };

        let result = pipeline::execute(&self.pipeline, &job).await;
        heartbeat.abort();

        let duration_ms = started.elapsed().as_millis() as f64;
        metrics::record_job_duration(duration_ms);

        match result {
            Ok(script) => {
                self.queue.ack(&message_id).await.ok();
                self.queue.clear_dedup(&job).await.ok();
                if let Err(e) = self.jobs.complete(&job_id, script.public_id.as_str()).await {
                    warn!(job_id = %job.job_id, "Completion bookkeeping failed: {}", e);
                }
                let event = QueueEvent::Completed {
                    job_id: job.job_id.clone(),
                    script_public_id: script.public_id.to_string(),
                    duration_ms: duration_ms as u64,
                };
                self.events.publish(&event).await.ok();
                info!(job_id = %job.job_id, duration_ms, "Job completed");
            }
            Err(e) => self.handle_failure(message_id, job, job_id, e).await,
        }
    }

    async fn handle_failure(
        &self,
        message_id: String,
        job: ScriptJob,
        job_id: JobId,
        error: WorkerError,
    ) {
        metrics::record_error(error.class());
        let retries = self.queue.increment_retry(&job.job_id).await.unwrap_or(u32::MAX);
        let can_retry = error.is_retryable() && retries < self.queue.max_retries();

        if can_retry {
            let mut backoff = self.queue.retry_backoff(retries);
            // A tripped circuit knows when the next probe is worthwhile.
            if let WorkerError::CircuitOpen(CircuitOpen { retry_after_ms, .. }) = &error {
                backoff = backoff.max(Duration::from_millis(*retry_after_ms));
            }
            warn!(
                job_id = %job.job_id,
                attempt = retries,
                backoff_secs = backoff.as_secs(),
                "Job failed, retrying: {}",
                error
            );

            self.queue.ack(&message_id).await.ok();
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                if let Err(e) = queue.requeue(&job).await {
                    error!(job_id = %job.job_id, "Requeue failed, job is lost to stall recovery: {}", e);
                }
            });
            return;
        }

        error!(
            job_id = %job.job_id,
            attempts = retries,
            class = error.class(),
            "Job failed permanently: {}",
            error
        );

        self.queue.ack(&message_id).await.ok();
        self.queue.clear_dedup(&job).await.ok();
        if let Err(e) = self.jobs.fail(&job_id, error.class()).await {
            warn!(job_id = %job.job_id, "Failure bookkeeping failed: {}", e);
        }

        let event = QueueEvent::Failed {
            job_id: job.job_id.clone(),
            error_class: error.class().to_string(),
            attempts: retries,
        };
        self.events.publish(&event).await.ok();

        self.deliver_fallback(&job).await;
    }

    /// Last-resort delivery: a clearly-marked skeleton so the conversation
    /// never dead-ends on a silent failure.
    async fn deliver_fallback(&self, job: &ScriptJob) {
        let script = fallback_script(&job.idea);
        let text = format!(
            "I couldn't finish your script this time, but here's a starting skeleton:\n\n{}",
            script
        );

        let send = self
            .pipeline
            .breakers
            .call(services::MESSAGING, self.pipeline.messaging.send_text(&job.subscriber_id, text))
            .await;
        match send {
            Ok(Ok(())) => info!(job_id = %job.job_id, "Delivered fallback script"),
            Ok(Err(e)) => warn!(job_id = %job.job_id, "Fallback delivery failed: {}", e),
            Err(open) => warn!(job_id = %job.job_id, "Messaging circuit open, fallback skipped: {}", open),
        }
    }
}
