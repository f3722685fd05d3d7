//! Repository for the tier-1 reel-analysis cache.
//!
//! Documents live in the `reelAnalysis` collection keyed by reel hash.
//! Expired entries read as misses; the sweep deletes them for real.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use reelscript_models::ReelAnalysis;

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, Filter, StructuredQuery, ToDocValue, Value};

const COLLECTION: &str = "reelAnalysis";

/// Repository for reel analysis documents.
#[derive(Clone)]
pub struct AnalysisRepository {
    client: StoreClient,
}

impl AnalysisRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Tier-1 cache lookup. Expired records are treated as misses.
    pub async fn get(&self, reel_hash: &str) -> StoreResult<Option<ReelAnalysis>> {
        let doc = self.client.get_document(COLLECTION, reel_hash).await?;
        let analysis = doc.map(|d| document_to_analysis(&d)).transpose()?;
        match analysis {
            Some(a) if a.is_expired() => {
                debug!(reel_hash, "Tier-1 record expired, treating as miss");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Write an analysis. An existing entry is only overwritten when the new
    /// record is richer (or the old one has expired).
    pub async fn upsert(&self, analysis: &ReelAnalysis) -> StoreResult<()> {
        let existing = self
            .client
            .get_document(COLLECTION, &analysis.reel_hash)
            .await?
            .map(|d| document_to_analysis(&d))
            .transpose()?;

        match existing {
            None => {
                self.client
                    .create_document(COLLECTION, &analysis.reel_hash, analysis_to_fields(analysis))
                    .await?;
                info!(reel_hash = %analysis.reel_hash, "Wrote tier-1 analysis");
            }
            Some(old) if old.is_expired() || old.is_enriched_by(analysis) => {
                self.client
                    .update_document(COLLECTION, &analysis.reel_hash, analysis_to_fields(analysis), None)
                    .await?;
                info!(reel_hash = %analysis.reel_hash, "Refreshed tier-1 analysis");
            }
            Some(_) => {
                debug!(reel_hash = %analysis.reel_hash, "Kept richer existing analysis");
            }
        }
        Ok(())
    }

    /// Delete expired analyses. Returns the number removed.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::lte("expiresAt", Utc::now().to_doc_value()))
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
            info!(removed, "Swept expired reel analyses");
        }
        Ok(removed)
    }
}

fn analysis_to_fields(analysis: &ReelAnalysis) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("reelHash".to_string(), analysis.reel_hash.to_doc_value());
    fields.insert("canonicalUrl".to_string(), analysis.canonical_url.to_doc_value());
    if let Some(ref t) = analysis.transcript {
        fields.insert("transcript".to_string(), t.to_doc_value());
    }
    if let Some(ref t) = analysis.tone {
        fields.insert("tone".to_string(), t.to_doc_value());
    }
    if let Some(ref h) = analysis.hook_type {
        fields.insert("hookType".to_string(), h.to_doc_value());
    }
    if let Some(ref c) = analysis.content_type {
        fields.insert("contentType".to_string(), c.to_doc_value());
    }
    fields.insert("visualCues".to_string(), analysis.visual_cues.to_doc_value());
    fields.insert("sceneDescriptions".to_string(), analysis.scene_descriptions.to_doc_value());
    if let Some(ref v) = analysis.video_url {
        fields.insert("videoUrl".to_string(), v.to_doc_value());
    }
    fields.insert("expiresAt".to_string(), analysis.expires_at.to_doc_value());
    fields.insert("createdAt".to_string(), analysis.created_at.to_doc_value());
    fields
}

fn document_to_analysis(doc: &Document) -> StoreResult<ReelAnalysis> {
    let missing = |field: &str| StoreError::invalid_response(format!("analysis missing {}", field));

    Ok(ReelAnalysis {
        reel_hash: read_field(doc, "reelHash").ok_or_else(|| missing("reelHash"))?,
        canonical_url: read_field(doc, "canonicalUrl").ok_or_else(|| missing("canonicalUrl"))?,
        transcript: read_field(doc, "transcript"),
        tone: read_field(doc, "tone"),
        hook_type: read_field(doc, "hookType"),
        content_type: read_field(doc, "contentType"),
        visual_cues: read_field(doc, "visualCues").unwrap_or_default(),
        scene_descriptions: read_field(doc, "sceneDescriptions").unwrap_or_default(),
        video_url: read_field(doc, "videoUrl"),
        expires_at: read_field(doc, "expiresAt").ok_or_else(|| missing("expiresAt"))?,
        created_at: read_field(doc, "createdAt").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let mut analysis = ReelAnalysis::new("hash1", "https://www.instagram.com/reel/AbC");
        analysis.transcript = Some("hello world".to_string());
        analysis.hook_type = Some("question".to_string());
        analysis.visual_cues = vec!["caption overlay".to_string()];

        let doc = Document::new(analysis_to_fields(&analysis));
        let back = document_to_analysis(&doc).unwrap();
        assert_eq!(back.reel_hash, "hash1");
        assert_eq!(back.transcript.as_deref(), Some("hello world"));
        assert_eq!(back.visual_cues, analysis.visual_cues);
        assert!(!back.is_expired());
    }
}
