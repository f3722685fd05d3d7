//! Repository for append-only dataset records.
//!
//! One document per completed generation in `datasetRecords`, keyed by
//! request hash. Scalar features are stored natively; feedback events are
//! stored as JSON blobs so the versioned variants pass through unmodified.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use reelscript_models::{DatasetRecord, DerivedFeatures, FeedbackEvent, ScriptMode};

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, Filter, StructuredQuery, ToDocValue, Value};

const COLLECTION: &str = "datasetRecords";

/// Repository for dataset documents.
#[derive(Clone)]
pub struct DatasetRepository {
    client: StoreClient,
}

impl DatasetRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Write the one record for a completed generation.
    pub async fn insert(&self, record: &DatasetRecord) -> StoreResult<()> {
        self.client
            .create_document(COLLECTION, &record.request_hash, record_to_fields(record)?)
            .await?;
        debug!(request_hash = %record.request_hash, "Wrote dataset record");
        Ok(())
    }

    pub async fn get(&self, request_hash: &str) -> StoreResult<Option<DatasetRecord>> {
        let doc = self.client.get_document(COLLECTION, request_hash).await?;
        doc.map(|d| document_to_record(&d)).transpose()
    }

    /// Append a feedback event to an existing record.
    pub async fn append_feedback(
        &self,
        request_hash: &str,
        event: FeedbackEvent,
    ) -> StoreResult<()> {
        let mut record = self
            .get(request_hash)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("datasetRecords/{}", request_hash)))?;
        record.feedback.push(event);

        let feedback_blobs: Vec<String> = record
            .feedback
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;

        let mut fields = HashMap::new();
        fields.insert("feedback".to_string(), feedback_blobs.to_doc_value());
        self.client
            .update_document(COLLECTION, request_hash, fields, Some(vec!["feedback".to_string()]))
            .await?;
        Ok(())
    }

    /// Page through records for export, newest first.
    pub async fn list(
        &self,
        limit: i32,
        skip: i32,
        validated_only: bool,
    ) -> StoreResult<Vec<DatasetRecord>> {
        let mut query = StructuredQuery::collection(COLLECTION)
            .order_desc("createdAt")
            .with_limit(limit)
            .with_offset(skip);
        if validated_only {
            query = query.with_filter(Filter::eq("validated", true.to_doc_value()));
        }

        let docs = self.client.run_query(query).await?;
        // Tolerate individual malformed rows in an export path.
        Ok(docs
            .iter()
            .filter_map(|d| match document_to_record(d) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Skipping malformed dataset record: {}", e);
                    None
                }
            })
            .collect())
    }

    pub async fn count_all(&self) -> StoreResult<u64> {
        self.client.count(StructuredQuery::collection(COLLECTION)).await
    }
}

fn record_to_fields(record: &DatasetRecord) -> StoreResult<HashMap<String, Value>> {
    let mut fields = HashMap::new();
    fields.insert("requestHash".to_string(), record.request_hash.to_doc_value());
    fields.insert("subscriberId".to_string(), record.subscriber_id.to_doc_value());
    fields.insert("canonicalUrl".to_string(), record.canonical_url.to_doc_value());
    fields.insert("idea".to_string(), record.idea.to_doc_value());
    fields.insert("variationIndex".to_string(), record.variation_index.to_doc_value());
    fields.insert("mode".to_string(), record.mode.as_str().to_doc_value());
    fields.insert("scriptText".to_string(), record.script_text.to_doc_value());
    fields.insert("generatorVersion".to_string(), record.generator_version.to_doc_value());
    fields.insert("generationMs".to_string(), record.generation_ms.to_doc_value());
    fields.insert("tier1CacheHit".to_string(), record.tier1_cache_hit.to_doc_value());
    fields.insert("isCopyMode".to_string(), record.is_copy_mode.to_doc_value());
    fields.insert("experimentIds".to_string(), record.experiment_ids.to_doc_value());
    fields.insert("wordCount".to_string(), record.derived.word_count.to_doc_value());
    fields.insert("sentenceCount".to_string(), record.derived.sentence_count.to_doc_value());
    fields.insert("hookWordCount".to_string(), record.derived.hook_word_count.to_doc_value());

    let feedback_blobs: Vec<String> = record
        .feedback
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<_, _>>()?;
    fields.insert("feedback".to_string(), feedback_blobs.to_doc_value());

    fields.insert("validated".to_string(), record.validated.to_doc_value());
    fields.insert("createdAt".to_string(), record.created_at.to_doc_value());
    Ok(fields)
}

fn document_to_record(doc: &Document) -> StoreResult<DatasetRecord> {
    let missing = |field: &str| StoreError::invalid_response(format!("dataset missing {}", field));

    let mode_raw: String = read_field(doc, "mode").unwrap_or_else(|| "full".to_string());
    let mode = ScriptMode::parse(&mode_raw).unwrap_or_default();

    let feedback = read_field::<Vec<String>>(doc, "feedback")
        .unwrap_or_default()
        .iter()
        .filter_map(|blob| serde_json::from_str::<FeedbackEvent>(blob).ok())
        .collect();

    Ok(DatasetRecord {
        request_hash: read_field(doc, "requestHash").ok_or_else(|| missing("requestHash"))?,
        subscriber_id: read_field(doc, "subscriberId").ok_or_else(|| missing("subscriberId"))?,
        canonical_url: read_field(doc, "canonicalUrl").unwrap_or_default(),
        idea: read_field(doc, "idea").unwrap_or_default(),
        variation_index: read_field(doc, "variationIndex").unwrap_or(0),
        mode,
        script_text: read_field(doc, "scriptText").unwrap_or_default(),
        generator_version: read_field(doc, "generatorVersion").unwrap_or_default(),
        generation_ms: read_field(doc, "generationMs").unwrap_or(0),
        tier1_cache_hit: read_field(doc, "tier1CacheHit").unwrap_or(false),
        is_copy_mode: read_field(doc, "isCopyMode").unwrap_or(false),
        experiment_ids: read_field(doc, "experimentIds").unwrap_or_default(),
        derived: DerivedFeatures {
            word_count: read_field(doc, "wordCount").unwrap_or(0),
            sentence_count: read_field(doc, "sentenceCount").unwrap_or(0),
            hook_word_count: read_field(doc, "hookWordCount").unwrap_or(0),
        },
        feedback,
        validated: read_field(doc, "validated").unwrap_or(false),
        created_at: read_field(doc, "createdAt").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DatasetRecord {
        DatasetRecord {
            request_hash: "h1".to_string(),
            subscriber_id: "12345".to_string(),
            canonical_url: "https://www.instagram.com/reel/AbC".to_string(),
            idea: "coding".to_string(),
            variation_index: 1,
            mode: ScriptMode::Full,
            script_text: "[HOOK]\nx".to_string(),
            generator_version: "gemini-2.0-flash/v3".to_string(),
            generation_ms: 900,
            tier1_cache_hit: true,
            is_copy_mode: false,
            experiment_ids: vec!["exp-7".to_string()],
            derived: DerivedFeatures {
                word_count: 10,
                sentence_count: 2,
                hook_word_count: 3,
            },
            feedback: vec![FeedbackEvent::V1 {
                rating: Some(4),
                feedback_text: None,
                recorded_at: Utc::now(),
            }],
            validated: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_field_round_trip_including_versioned_feedback() {
        let record = sample_record();
        let doc = Document::new(record_to_fields(&record).unwrap());
        let back = document_to_record(&doc).unwrap();
        assert_eq!(back.request_hash, record.request_hash);
        assert_eq!(back.tier1_cache_hit, true);
        assert_eq!(back.derived.word_count, 10);
        assert_eq!(back.feedback.len(), 1);
        assert_eq!(back.feedback[0].rating(), Some(4));
    }
}
