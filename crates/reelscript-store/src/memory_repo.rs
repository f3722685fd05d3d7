//! Repository for per-subscriber memory.

use std::collections::HashMap;

use chrono::Utc;

use reelscript_models::UserMemory;

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, ToDocValue, Value};

const COLLECTION: &str = "userMemory";

/// Repository for user memory documents, keyed by subscriber id.
#[derive(Clone)]
pub struct MemoryRepository {
    client: StoreClient,
}

impl MemoryRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, subscriber_id: &str) -> StoreResult<Option<UserMemory>> {
        let doc = self.client.get_document(COLLECTION, subscriber_id).await?;
        doc.map(|d| document_to_memory(&d)).transpose()
    }

    /// Create or replace the memory record.
    pub async fn upsert(&self, memory: &UserMemory) -> StoreResult<()> {
        let fields = memory_to_fields(memory);
        match self
            .client
            .create_document(COLLECTION, &memory.subscriber_id, fields.clone())
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => {
                self.client
                    .update_document(COLLECTION, &memory.subscriber_id, fields, None)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fold one feedback polarity into the counts.
    pub async fn record_feedback(&self, subscriber_id: &str, positive: bool) -> StoreResult<()> {
        let mut memory = self
            .get(subscriber_id)
            .await?
            .unwrap_or_else(|| UserMemory {
                subscriber_id: subscriber_id.to_string(),
                ..Default::default()
            });
        if positive {
            memory.positive_feedback_count += 1;
        } else {
            memory.negative_feedback_count += 1;
        }
        memory.updated_at = Some(Utc::now());
        self.upsert(&memory).await
    }
}

fn memory_to_fields(memory: &UserMemory) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("subscriberId".to_string(), memory.subscriber_id.to_doc_value());
    if let Some(ref n) = memory.niche {
        fields.insert("niche".to_string(), n.to_doc_value());
    }
    if let Some(ref t) = memory.preferred_tone {
        fields.insert("preferredTone".to_string(), t.to_doc_value());
    }
    fields.insert("positiveFeedbackCount".to_string(), memory.positive_feedback_count.to_doc_value());
    fields.insert("negativeFeedbackCount".to_string(), memory.negative_feedback_count.to_doc_value());
    fields.insert("updatedAt".to_string(), Utc::now().to_doc_value());
    fields
}

fn document_to_memory(doc: &Document) -> StoreResult<UserMemory> {
    Ok(UserMemory {
        subscriber_id: read_field(doc, "subscriberId")
            .ok_or_else(|| StoreError::invalid_response("memory missing subscriberId"))?,
        niche: read_field(doc, "niche"),
        preferred_tone: read_field(doc, "preferredTone"),
        positive_feedback_count: read_field(doc, "positiveFeedbackCount").unwrap_or(0),
        negative_feedback_count: read_field(doc, "negativeFeedbackCount").unwrap_or(0),
        updated_at: read_field(doc, "updatedAt"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let memory = UserMemory {
            subscriber_id: "12345".to_string(),
            niche: Some("fitness".to_string()),
            preferred_tone: None,
            positive_feedback_count: 3,
            negative_feedback_count: 1,
            updated_at: None,
        };
        let doc = Document::new(memory_to_fields(&memory));
        let back = document_to_memory(&doc).unwrap();
        assert_eq!(back.niche.as_deref(), Some("fitness"));
        assert_eq!(back.positive_feedback_count, 3);
    }
}
