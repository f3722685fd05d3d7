//! Per-job stage pipeline.
//!
//! load → tier-1 check → (miss: download → probe → frames+audio) →
//! analysis → generation → render → persist → deliver. Stages run
//! sequentially inside one job; the clock is checked before every external
//! call so an expired job aborts with a typed timeout instead of burning
//! upstream quota. Cleanup runs on every exit path.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use reelscript_breaker::{services, BreakerRegistry, CircuitOpen};
use reelscript_media::{
    download_reel, extract_audio, extract_frames, probe_and_enforce_duration, DownloadConfig,
    JobWorkspace,
};
use reelscript_messaging::{CarouselCard, MessagingClient, OutboundMessage, UrlButton};
use reelscript_models::{
    copy_mode_script, AnalysisMode, DatasetRecord, DerivedFeatures, ReelAnalysis, ScriptRecord,
    ScriptSections,
};
use reelscript_queue::{ScriptJob, SessionStore};
use reelscript_storage::R2Client;
use reelscript_store::{AnalysisRepository, DatasetRepository, ScriptRepository, StoreError};

use crate::config::WorkerConfig;
use crate::context::load_prior_context;
use crate::error::{WorkerError, WorkerResult};
use crate::gemini::{GeminiClient, GenerationInput, StructuredAnalysis};
use crate::metrics;
use crate::render::CardRenderer;

/// Everything a job run needs, wired once at boot.
pub struct PipelineServices {
    pub config: WorkerConfig,
    pub download: DownloadConfig,
    pub scripts: ScriptRepository,
    pub analyses: AnalysisRepository,
    pub dataset: DatasetRepository,
    pub sessions: SessionStore,
    pub storage: R2Client,
    pub messaging: Arc<MessagingClient>,
    pub gemini: GeminiClient,
    pub renderer: CardRenderer,
    pub breakers: Arc<BreakerRegistry>,
}

/// Wall-clock budget for one job; checked before every I/O stage.
pub struct StageClock {
    deadline: Instant,
    budget_secs: u64,
}

impl StageClock {
    pub fn new(budget: std::time::Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            budget_secs: budget.as_secs(),
        }
    }

    /// Abort check at a stage boundary.
    pub fn ensure_active(&self) -> WorkerResult<()> {
        if Instant::now() >= self.deadline {
            Err(WorkerError::Timeout(self.budget_secs))
        } else {
            Ok(())
        }
    }
}

/// Run one breaker-guarded call, lifting a denial into the worker taxonomy.
async fn guarded<T, F>(
    breakers: &BreakerRegistry,
    service: &'static str,
    fut: F,
) -> WorkerResult<T>
where
    F: std::future::Future<Output = WorkerResult<T>>,
{
    match breakers.call(service, fut).await {
        Ok(inner) => inner,
        Err(denial @ CircuitOpen { .. }) => Err(WorkerError::CircuitOpen(denial)),
    }
}

/// Execute a job end to end. The workspace is removed on every exit path,
/// including timeouts.
pub async fn execute(pipeline: &PipelineServices, job: &ScriptJob) -> WorkerResult<ScriptRecord> {
    let workspace = JobWorkspace::create(&pipeline.config.temp_root, &job.job_id).await
        .map_err(|e| WorkerError::from_media("download", e))?;

    let clock = StageClock::new(pipeline.config.job_timeout);
    let result = tokio::time::timeout(
        pipeline.config.job_timeout,
        run_stages(pipeline, job, &workspace, &clock),
    )
    .await
    .unwrap_or_else(|_| Err(WorkerError::Timeout(pipeline.config.job_timeout.as_secs())));

    workspace.cleanup().await;
    result
}

async fn run_stages(
    pipeline: &PipelineServices,
    job: &ScriptJob,
    workspace: &JobWorkspace,
    clock: &StageClock,
) -> WorkerResult<ScriptRecord> {
    let started = Instant::now();

    // Stage 1: tier-1 cache check.
    clock.ensure_active()?;
    let cached_analysis = match pipeline.analyses.get(&job.reel_hash).await {
        Ok(found) => {
            metrics::record_cache_event("tier1", found.is_some());
            found
        }
        Err(e) => {
            warn!("Tier-1 lookup failed (treating as miss): {}", e);
            metrics::record_cache_event("tier1", false);
            None
        }
    };

    let prior = load_prior_context(&pipeline.scripts, &job.canonical_url, &job.idea).await;
    let tier1_hit = cached_analysis.is_some();

    let script_text = match cached_analysis {
        Some(analysis) => {
            // Cheap path: cached analysis, text-only generation (or the
            // transcript reformat in copy mode).
            if job.is_copy_mode {
                copy_script_from(&analysis)
            } else {
                clock.ensure_active()?;
                let input = generation_input(job, &prior);
                let gen_started = Instant::now();
                let text = guarded(
                    &pipeline.breakers,
                    services::GENERATION,
                    pipeline.gemini.generate_script_text(&analysis, &input),
                )
                .await?;
                metrics::record_generator_duration(gen_started.elapsed().as_millis() as f64);
                text
            }
        }
        None => cold_path(pipeline, job, workspace, clock, &prior).await?,
    };

    // Stage 6: render cards and upload them.
    clock.ensure_active()?;
    let sections = ScriptSections::parse(&script_text);
    let images = guarded(
        &pipeline.breakers,
        services::UPLOAD,
        pipeline.renderer.render_cards(&sections),
    )
    .await?;

    let mut image_urls = Vec::with_capacity(images.len());
    for (index, bytes) in images.into_iter().enumerate() {
        clock.ensure_active()?;
        let key = format!("cards/{}/card_{:02}.png", job.request_hash, index + 1);
        let url = guarded(&pipeline.breakers, services::UPLOAD, async {
            pipeline
                .storage
                .upload_bytes(bytes, &key, "image/png")
                .await
                .map_err(|e| WorkerError::upstream("upload", e.to_string()))
        })
        .await?;
        image_urls.push(url);
    }

    // Stage 7: mint the public handle and persist Script + DatasetRecord.
    clock.ensure_active()?;
    let public_id = pipeline.scripts.mint_public_id().await?;
    let view_url = pipeline.config.view_url(public_id.as_str());

    let script = ScriptRecord {
        request_hash: job.request_hash.clone(),
        public_id,
        subscriber_id: job.subscriber_id.clone(),
        canonical_url: job.canonical_url.clone(),
        idea: job.idea.clone(),
        variation_index: job.variation_index,
        script_text: script_text.clone(),
        image_urls: image_urls.clone(),
        view_url: view_url.clone(),
        generator_version: pipeline.gemini.generator_version(),
        generation_ms: started.elapsed().as_millis() as u64,
        is_copy_mode: job.is_copy_mode,
        quality_score: None,
        created_at: Utc::now(),
    };

    let script = match pipeline.scripts.insert(&script).await {
        Ok(()) => script,
        Err(StoreError::AlreadyExists(_)) => {
            // Another worker finished the same request first; theirs wins.
            info!(request_hash = %job.request_hash, "Script already stored, adopting it");
            pipeline
                .scripts
                .get_by_request_hash(&job.request_hash)
                .await?
                .ok_or_else(|| WorkerError::internal("script vanished after conflict"))?
        }
        Err(e) => return Err(e.into()),
    };

    let dataset_record = DatasetRecord {
        request_hash: script.request_hash.clone(),
        subscriber_id: script.subscriber_id.clone(),
        canonical_url: script.canonical_url.clone(),
        idea: script.idea.clone(),
        variation_index: script.variation_index,
        mode: job.mode,
        script_text: script.script_text.clone(),
        generator_version: script.generator_version.clone(),
        generation_ms: script.generation_ms,
        tier1_cache_hit: tier1_hit,
        is_copy_mode: job.is_copy_mode,
        experiment_ids: pipeline.config.experiment_ids.clone(),
        derived: DerivedFeatures::from_script(&script.script_text, &sections.hook),
        feedback: Vec::new(),
        validated: false,
        created_at: Utc::now(),
    };
    if let Err(e) = pipeline.dataset.insert(&dataset_record).await {
        // Append-only collaborator: losing one row must not undo a
        // delivered script.
        warn!("Dataset write failed (ignored): {}", e);
    }

    // Stage 8: messaging side-effects, copy-URL field strictly before the
    // image-URL trigger field. Delivery failure never fails the job; the
    // artifact is already durable and retrievable.
    clock.ensure_active()?;
    deliver(pipeline, job, &script).await;

    // Session memory: the conversation moves to awaiting_confirm.
    match pipeline.sessions.load_or_fresh(&job.subscriber_id).await {
        Ok(mut session) => {
            session.observe_result(&script.request_hash, script.public_id.as_str());
            if let Err(e) = pipeline.sessions.save(&session).await {
                warn!("Session update failed (ignored): {}", e);
            }
        }
        Err(e) => warn!("Session load failed (ignored): {}", e),
    }

    info!(
        request_hash = %script.request_hash,
        public_id = %script.public_id,
        duration_ms = script.generation_ms,
        "Job pipeline completed"
    );
    Ok(script)
}

/// Stages 2-5 on a tier-1 miss: download, probe, extract, one-shot
/// generation, then the structured-analysis call that fills the cache for
/// next time.
async fn cold_path(
    pipeline: &PipelineServices,
    job: &ScriptJob,
    workspace: &JobWorkspace,
    clock: &StageClock,
    prior: &crate::context::PriorContext,
) -> WorkerResult<String> {
    // Stage 2: download.
    clock.ensure_active()?;
    let video_path = workspace.video_path();
    guarded(&pipeline.breakers, services::DOWNLOAD, async {
        download_reel(&job.canonical_url, &video_path, &pipeline.download)
            .await
            .map_err(|e| WorkerError::from_media("download", e))
    })
    .await?;

    clock.ensure_active()?;
    let info = probe_and_enforce_duration(
        &video_path,
        &pipeline.config.ffprobe_path,
        pipeline.download.max_duration_secs,
    )
    .await
    .map_err(|e| WorkerError::from_media("download", e))?;

    // Stage 3: frames and audio per the analysis mode.
    let frames = if pipeline.config.analysis_mode != AnalysisMode::Audio {
        clock.ensure_active()?;
        extract_frames(
            &video_path,
            workspace.frames_dir(),
            info.duration,
            &pipeline.config.ffmpeg_path,
        )
        .await
        .map_err(|e| WorkerError::from_media("download", e))?
    } else {
        Vec::new()
    };

    let audio = if pipeline.config.analysis_mode != AnalysisMode::Frames {
        clock.ensure_active()?;
        Some(
            extract_audio(&video_path, workspace.audio_path(), &pipeline.config.ffmpeg_path)
                .await
                .map_err(|e| WorkerError::from_media("download", e))?,
        )
    } else {
        None
    };
    let audio_ref = audio.as_deref();

    // Stage 5 (copy mode skips the generator entirely).
    let script_text = if job.is_copy_mode {
        None
    } else {
        clock.ensure_active()?;
        let input = generation_input(job, prior);
        let gen_started = Instant::now();
        let text = guarded(
            &pipeline.breakers,
            services::GENERATION,
            pipeline
                .gemini
                .generate_script_multimodal(&frames, audio_ref, &input),
        )
        .await?;
        metrics::record_generator_duration(gen_started.elapsed().as_millis() as f64);
        Some(text)
    };

    // Stage 4/5b: structured analysis, so future requests for this reel
    // take the cheap path.
    clock.ensure_active()?;
    let analysis_started = Instant::now();
    let structured = guarded(
        &pipeline.breakers,
        services::ANALYSIS,
        pipeline.gemini.analyze_structured(&frames, audio_ref),
    )
    .await?;
    metrics::record_analysis_duration(analysis_started.elapsed().as_millis() as f64);

    let analysis = analysis_record(job, structured);
    if let Err(e) = pipeline.analyses.upsert(&analysis).await {
        // Cache write only; the next request re-downloads.
        warn!("Tier-1 write failed (ignored): {}", e);
    }

    Ok(match script_text {
        Some(text) => text,
        None => copy_script_from(&analysis),
    })
}

fn generation_input<'a>(
    job: &'a ScriptJob,
    prior: &'a crate::context::PriorContext,
) -> GenerationInput<'a> {
    GenerationInput {
        idea: &job.idea,
        mode: job.mode,
        tone: job.tone,
        intensity: job.intensity,
        language_hint: job.language_hint.as_deref(),
        prior,
    }
}

fn analysis_record(job: &ScriptJob, structured: StructuredAnalysis) -> ReelAnalysis {
    let mut analysis = ReelAnalysis::new(&job.reel_hash, &job.canonical_url);
    analysis.transcript = structured.transcript;
    analysis.tone = structured.tone;
    analysis.hook_type = structured.hook_type;
    analysis.content_type = structured.content_type;
    analysis.visual_cues = structured.visual_cues;
    analysis.scene_descriptions = structured.scene_descriptions;
    analysis
}

fn copy_script_from(analysis: &ReelAnalysis) -> String {
    copy_mode_script(
        analysis.transcript.as_deref().unwrap_or_default(),
        &analysis.scene_descriptions,
        &analysis.visual_cues,
    )
}

/// Messaging side-effects in contractual order; failures are logged only.
async fn deliver(pipeline: &PipelineServices, job: &ScriptJob, script: &ScriptRecord) {
    let image_url = script.image_urls.first().cloned().unwrap_or_default();

    let fields = guarded(&pipeline.breakers, services::MESSAGING, async {
        pipeline
            .messaging
            .deliver_artifact_fields(&job.subscriber_id, &script.view_url, &image_url)
            .await
            .map_err(|e| WorkerError::upstream("messaging", e.to_string()))
    })
    .await;
    if let Err(e) = fields {
        warn!(job_id = %job.job_id, "Field delivery failed (job still succeeds): {}", e);
        return;
    }

    if pipeline.messaging.send_direct_messages() {
        let cards: Vec<CarouselCard> = script
            .image_urls
            .iter()
            .map(|url| CarouselCard {
                image_url: url.clone(),
                title: "Your script is ready".to_string(),
                subtitle: Some(script.idea.clone()),
                buttons: vec![UrlButton {
                    caption: "Open & copy".to_string(),
                    url: script.view_url.clone(),
                }],
            })
            .collect();

        let send = guarded(&pipeline.breakers, services::MESSAGING, async {
            pipeline
                .messaging
                .send_message(&job.subscriber_id, OutboundMessage::Carousel(cards))
                .await
                .map_err(|e| WorkerError::upstream("messaging", e.to_string()))
        })
        .await;
        if let Err(e) = send {
            warn!(job_id = %job.job_id, "Direct message failed (ignored): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_clock_expiry() {
        let clock = StageClock::new(Duration::from_secs(0));
        assert!(matches!(clock.ensure_active(), Err(WorkerError::Timeout(0))));

        let live = StageClock::new(Duration::from_secs(60));
        assert!(live.ensure_active().is_ok());
    }

    #[test]
    fn test_copy_script_uses_analysis_parts() {
        let mut analysis = ReelAnalysis::new("h", "u");
        analysis.transcript = Some("One. Two. Three.".to_string());
        analysis.scene_descriptions = vec!["desk shot".to_string()];
        let script = copy_script_from(&analysis);
        assert!(script.contains("[HOOK]\nOne."));
        assert!(script.contains("desk shot"));
    }
}
