//! Repository for generated script records.
//!
//! Documents live in the `scripts` collection keyed by request hash. The
//! public id is a secondary unique attribute resolved by query.

use std::collections::HashMap;

use tracing::{info, warn};

use reelscript_models::{PublicId, ScriptRecord};

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, Filter, StructuredQuery, ToDocValue, Value};

const COLLECTION: &str = "scripts";

/// Draw attempts before giving up on a collision-free public id.
const PUBLIC_ID_DRAWS: u32 = 5;

/// Repository for script documents.
#[derive(Clone)]
pub struct ScriptRepository {
    client: StoreClient,
}

impl ScriptRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Tier-2 cache lookup.
    pub async fn get_by_request_hash(&self, request_hash: &str) -> StoreResult<Option<ScriptRecord>> {
        let doc = self.client.get_document(COLLECTION, request_hash).await?;
        doc.map(|d| document_to_script(&d)).transpose()
    }

    /// Public-view lookup.
    pub async fn get_by_public_id(&self, public_id: &PublicId) -> StoreResult<Option<ScriptRecord>> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::eq("publicId", public_id.as_str().to_doc_value()));
        let doc = self.client.find_one(query).await?;
        doc.map(|d| document_to_script(&d)).transpose()
    }

    /// Draw a public id that is not yet taken, re-drawing on collision.
    pub async fn mint_public_id(&self) -> StoreResult<PublicId> {
        for _ in 0..PUBLIC_ID_DRAWS {
            let candidate = PublicId::generate();
            if self.get_by_public_id(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            warn!("Public id collision on {}, re-drawing", candidate);
        }
        Err(StoreError::request_failed("could not mint a collision-free public id"))
    }

    /// Insert a new script. The record is immutable after this write except
    /// for feedback-scored fields.
    pub async fn insert(&self, script: &ScriptRecord) -> StoreResult<()> {
        self.client
            .create_document(COLLECTION, &script.request_hash, script_to_fields(script))
            .await?;
        info!(
            request_hash = %script.request_hash,
            public_id = %script.public_id,
            "Stored script"
        );
        Ok(())
    }

    /// Recent scripts for one canonical URL, newest first. Feeds the
    /// prior-context retrieval before generation.
    pub async fn list_recent_for_url(
        &self,
        canonical_url: &str,
        limit: i32,
    ) -> StoreResult<Vec<ScriptRecord>> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::eq("canonicalUrl", canonical_url.to_doc_value()))
            .order_desc("createdAt")
            .with_limit(limit);
        let docs = self.client.run_query(query).await?;
        docs.iter().map(document_to_script).collect()
    }

    /// Update the feedback-scored quality field.
    pub async fn update_quality(&self, request_hash: &str, quality_score: f64) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("qualityScore".to_string(), quality_score.to_doc_value());
        self.client
            .update_document(
                COLLECTION,
                request_hash,
                fields,
                Some(vec!["qualityScore".to_string()]),
            )
            .await?;
        Ok(())
    }
}

fn script_to_fields(script: &ScriptRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("requestHash".to_string(), script.request_hash.to_doc_value());
    fields.insert("publicId".to_string(), script.public_id.as_str().to_doc_value());
    fields.insert("subscriberId".to_string(), script.subscriber_id.to_doc_value());
    fields.insert("canonicalUrl".to_string(), script.canonical_url.to_doc_value());
    fields.insert("idea".to_string(), script.idea.to_doc_value());
    fields.insert("variationIndex".to_string(), script.variation_index.to_doc_value());
    fields.insert("scriptText".to_string(), script.script_text.to_doc_value());
    fields.insert("imageUrls".to_string(), script.image_urls.to_doc_value());
    fields.insert("viewUrl".to_string(), script.view_url.to_doc_value());
    fields.insert("generatorVersion".to_string(), script.generator_version.to_doc_value());
    fields.insert("generationMs".to_string(), script.generation_ms.to_doc_value());
    fields.insert("isCopyMode".to_string(), script.is_copy_mode.to_doc_value());
    if let Some(score) = script.quality_score {
        fields.insert("qualityScore".to_string(), score.to_doc_value());
    }
    fields.insert("createdAt".to_string(), script.created_at.to_doc_value());
    fields
}

fn document_to_script(doc: &Document) -> StoreResult<ScriptRecord> {
    let missing = |field: &str| StoreError::invalid_response(format!("script missing {}", field));

    let public_id_raw: String = read_field(doc, "publicId").ok_or_else(|| missing("publicId"))?;
    let public_id = PublicId::parse(&public_id_raw)
        .ok_or_else(|| StoreError::invalid_response(format!("bad publicId {}", public_id_raw)))?;

    Ok(ScriptRecord {
        request_hash: read_field(doc, "requestHash").ok_or_else(|| missing("requestHash"))?,
        public_id,
        subscriber_id: read_field(doc, "subscriberId").ok_or_else(|| missing("subscriberId"))?,
        canonical_url: read_field(doc, "canonicalUrl").ok_or_else(|| missing("canonicalUrl"))?,
        idea: read_field(doc, "idea").unwrap_or_default(),
        variation_index: read_field(doc, "variationIndex").unwrap_or(0),
        script_text: read_field(doc, "scriptText").ok_or_else(|| missing("scriptText"))?,
        image_urls: read_field(doc, "imageUrls").unwrap_or_default(),
        view_url: read_field(doc, "viewUrl").unwrap_or_default(),
        generator_version: read_field(doc, "generatorVersion").unwrap_or_default(),
        generation_ms: read_field(doc, "generationMs").unwrap_or(0),
        is_copy_mode: read_field(doc, "isCopyMode").unwrap_or(false),
        quality_score: read_field(doc, "qualityScore"),
        created_at: read_field(doc, "createdAt").unwrap_or_else(chrono::Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_script() -> ScriptRecord {
        ScriptRecord {
            request_hash: "abc123".to_string(),
            public_id: PublicId::parse("AbCdEf12").unwrap(),
            subscriber_id: "12345".to_string(),
            canonical_url: "https://www.instagram.com/reel/AbC".to_string(),
            idea: "make it about coding".to_string(),
            variation_index: 0,
            script_text: "[HOOK]\nhi\n\n[BODY]\nbody\n\n[CTA]\nbye".to_string(),
            image_urls: vec!["https://cdn.example/card1.png".to_string()],
            view_url: "https://reelscript.app/s/AbCdEf12".to_string(),
            generator_version: "gemini-2.0-flash/v3".to_string(),
            generation_ms: 12_345,
            is_copy_mode: false,
            quality_score: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_field_round_trip() {
        let script = sample_script();
        let doc = Document::new(script_to_fields(&script));
        let back = document_to_script(&doc).unwrap();
        assert_eq!(back.request_hash, script.request_hash);
        assert_eq!(back.public_id, script.public_id);
        assert_eq!(back.image_urls, script.image_urls);
        assert_eq!(back.generation_ms, script.generation_ms);
        assert_eq!(back.quality_score, None);
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let mut fields = script_to_fields(&sample_script());
        fields.remove("scriptText");
        let doc = Document::new(fields);
        assert!(document_to_script(&doc).is_err());
    }
}
