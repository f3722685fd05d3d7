//! Repository for durable job records.
//!
//! Documents live in the `jobs` collection keyed by job id. State changes go
//! through `transition`, which enforces the monotonic lifecycle with an
//! optimistic update-time precondition.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use reelscript_models::{JobId, JobRecord, JobStatus};

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, Filter, StructuredQuery, ToDocValue, Value};

const COLLECTION: &str = "jobs";

/// Attempts against precondition races before giving up.
const TRANSITION_ATTEMPTS: u32 = 3;

/// Terminal records older than this are swept.
pub const JOB_TTL_DAYS: i64 = 7;

/// Repository for job documents.
#[derive(Clone)]
pub struct JobRepository {
    client: StoreClient,
}

impl JobRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let doc = self.client.get_document(COLLECTION, job_id.as_str()).await?;
        doc.map(|d| document_to_job(&d)).transpose()
    }

    /// Persist a freshly queued job.
    pub async fn insert(&self, job: &JobRecord) -> StoreResult<()> {
        self.client
            .create_document(COLLECTION, job.job_id.as_str(), job_to_fields(job))
            .await?;
        debug!(job_id = %job.job_id, request_hash = %job.request_hash, "Persisted queued job");
        Ok(())
    }

    /// Any job still in {queued, processing} for this request hash.
    /// Backs the one-active-job-per-request invariant at enqueue time.
    pub async fn find_active_by_request_hash(
        &self,
        request_hash: &str,
    ) -> StoreResult<Option<JobRecord>> {
        let query = StructuredQuery::collection(COLLECTION).with_filter(Filter::and(vec![
            Filter::eq("requestHash", request_hash.to_doc_value()),
            Filter::in_values(
                "status",
                vec![
                    Value::StringValue("queued".to_string()),
                    Value::StringValue("processing".to_string()),
                ],
            ),
        ]));
        let doc = self.client.find_one(query).await?;
        doc.map(|d| document_to_job(&d)).transpose()
    }

    /// Find-one-and-update with a monotonic state transition.
    ///
    /// Reads the document, verifies the lifecycle allows `next`, and writes
    /// with an update-time precondition. Precondition races re-read and
    /// retry; an illegal transition returns `Ok(None)` untouched.
    pub async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        extra_fields: HashMap<String, Value>,
    ) -> StoreResult<Option<JobRecord>> {
        for attempt in 0..TRANSITION_ATTEMPTS {
            let doc = self
                .client
                .get_document(COLLECTION, job_id.as_str())
                .await?
                .ok_or_else(|| StoreError::not_found(format!("jobs/{}", job_id)))?;

            let current = document_to_job(&doc)?;
            if !current.status.can_transition_to(next) {
                debug!(
                    job_id = %job_id,
                    from = current.status.as_str(),
                    to = next.as_str(),
                    "Rejected non-monotonic job transition"
                );
                return Ok(None);
            }

            let update_time = doc
                .update_time
                .clone()
                .ok_or_else(|| StoreError::invalid_response("job document missing updateTime"))?;

            let mut fields = HashMap::new();
            fields.insert("status".to_string(), next.as_str().to_doc_value());
            if next == JobStatus::Processing && current.started_at.is_none() {
                fields.insert("startedAt".to_string(), Utc::now().to_doc_value());
            }
            if next.is_terminal() {
                fields.insert("completedAt".to_string(), Utc::now().to_doc_value());
            }
            for (k, v) in &extra_fields {
                fields.insert(k.clone(), v.clone());
            }
            let mask: Vec<String> = fields.keys().cloned().collect();

            match self
                .client
                .update_document_with_precondition(
                    COLLECTION,
                    job_id.as_str(),
                    fields,
                    Some(mask),
                    &update_time,
                )
                .await
            {
                Ok(doc) => return document_to_job(&doc).map(Some),
                Err(e) if e.is_precondition_failed() && attempt + 1 < TRANSITION_ATTEMPTS => {
                    warn!(job_id = %job_id, attempt, "Job transition raced, re-reading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::request_failed(format!(
            "job {} transition kept racing",
            job_id
        )))
    }

    /// Record a consumed delivery attempt.
    pub async fn record_attempt(&self, job_id: &JobId, attempts: u32) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("attempts".to_string(), attempts.to_doc_value());
        self.client
            .update_document(COLLECTION, job_id.as_str(), fields, Some(vec!["attempts".to_string()]))
            .await?;
        Ok(())
    }

    /// Mark completed with the produced script's public id.
    pub async fn complete(&self, job_id: &JobId, script_public_id: &str) -> StoreResult<()> {
        let mut extra = HashMap::new();
        extra.insert("resultScriptId".to_string(), script_public_id.to_doc_value());
        self.transition(job_id, JobStatus::Completed, extra).await?;
        Ok(())
    }

    /// Mark failed with a one-line error classification.
    pub async fn fail(&self, job_id: &JobId, error_summary: &str) -> StoreResult<()> {
        let mut extra = HashMap::new();
        extra.insert("errorSummary".to_string(), error_summary.to_doc_value());
        self.transition(job_id, JobStatus::Failed, extra).await?;
        Ok(())
    }

    /// Number of jobs currently processing (active-jobs gauge).
    pub async fn count_processing(&self) -> StoreResult<u64> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::eq("status", "processing".to_doc_value()));
        self.client.count(query).await
    }

    /// Delete terminal jobs whose completion is older than the TTL horizon.
    /// Returns the number of records removed.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        let horizon = Utc::now() - Duration::days(JOB_TTL_DAYS);
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::and(vec![
                Filter::in_values(
                    "status",
                    vec![
                        Value::StringValue("completed".to_string()),
                        Value::StringValue("failed".to_string()),
                    ],
                ),
                Filter::lte("completedAt", horizon.to_doc_value()),
            ]))
            .with_limit(100);

        let docs = self.client.run_query(query).await?;
        let mut removed = 0u64;
        for doc in docs {
            if let Some(id) = doc.doc_id() {
                self.client.delete_document(COLLECTION, id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept expired job records");
        }
        Ok(removed)
    }
}

fn job_to_fields(job: &JobRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("jobId".to_string(), job.job_id.as_str().to_doc_value());
    fields.insert("subscriberId".to_string(), job.subscriber_id.to_doc_value());
    fields.insert("requestHash".to_string(), job.request_hash.to_doc_value());
    fields.insert("status".to_string(), job.status.as_str().to_doc_value());
    fields.insert("attempts".to_string(), job.attempts.to_doc_value());
    if let Some(t) = job.started_at {
        fields.insert("startedAt".to_string(), t.to_doc_value());
    }
    if let Some(t) = job.completed_at {
        fields.insert("completedAt".to_string(), t.to_doc_value());
    }
    if let Some(ref e) = job.error_summary {
        fields.insert("errorSummary".to_string(), e.to_doc_value());
    }
    if let Some(ref r) = job.result_script_id {
        fields.insert("resultScriptId".to_string(), r.to_doc_value());
    }
    fields.insert("createdAt".to_string(), job.created_at.to_doc_value());
    fields
}

fn document_to_job(doc: &Document) -> StoreResult<JobRecord> {
    let missing = |field: &str| StoreError::invalid_response(format!("job missing {}", field));

    let status_raw: String = read_field(doc, "status").ok_or_else(|| missing("status"))?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::invalid_response(format!("bad job status {}", status_raw)))?;

    Ok(JobRecord {
        job_id: JobId::from_string(
            read_field::<String>(doc, "jobId").ok_or_else(|| missing("jobId"))?,
        ),
        subscriber_id: read_field(doc, "subscriberId").ok_or_else(|| missing("subscriberId"))?,
        request_hash: read_field(doc, "requestHash").ok_or_else(|| missing("requestHash"))?,
        status,
        attempts: read_field(doc, "attempts").unwrap_or(0),
        started_at: read_field(doc, "startedAt"),
        completed_at: read_field(doc, "completedAt"),
        error_summary: read_field(doc, "errorSummary"),
        result_script_id: read_field(doc, "resultScriptId"),
        created_at: read_field(doc, "createdAt").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let job = JobRecord::queued("12345", "hash123");
        let doc = Document::new(job_to_fields(&job));
        let back = document_to_job(&doc).unwrap();
        assert_eq!(back.job_id, job.job_id);
        assert_eq!(back.status, JobStatus::Queued);
        assert_eq!(back.attempts, 0);
        assert!(back.started_at.is_none());
    }

    #[test]
    fn test_bad_status_is_an_error() {
        let mut fields = job_to_fields(&JobRecord::queued("1", "h"));
        fields.insert("status".to_string(), "exploded".to_doc_value());
        assert!(document_to_job(&Document::new(fields)).is_err());
    }
}
