//! Repository for subscriber records.
//!
//! Documents live in the `users` collection keyed by subscriber id. Beta
//! admission arithmetic (active count, ordinals, waitlist positions) lives
//! here; the policy that uses it lives in the access gate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use reelscript_models::{AccessStatus, UserRecord};

use crate::client::StoreClient;
use crate::error::{StoreError, StoreResult};
use crate::types::{read_field, Document, Filter, StructuredQuery, ToDocValue, Value};

const COLLECTION: &str = "users";

/// Repository for user documents.
#[derive(Clone)]
pub struct UserRepository {
    client: StoreClient,
}

impl UserRepository {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, subscriber_id: &str) -> StoreResult<Option<UserRecord>> {
        let doc = self.client.get_document(COLLECTION, subscriber_id).await?;
        doc.map(|d| document_to_user(&d)).transpose()
    }

    /// Insert a new user; fails if the subscriber already exists.
    pub async fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        self.client
            .create_document(COLLECTION, &user.subscriber_id, user_to_fields(user))
            .await?;
        info!(
            subscriber_id = %user.subscriber_id,
            access = user.access.as_str(),
            "Created user record"
        );
        Ok(())
    }

    /// Number of admitted users. Recomputed before every admission so the
    /// capacity invariant holds.
    pub async fn count_active(&self) -> StoreResult<u64> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::eq("access", "active".to_doc_value()));
        self.client.count(query).await
    }

    /// Highest ordinal handed out so far. Ordinals are strictly monotonic;
    /// the next admission uses this plus one.
    pub async fn max_registration_number(&self) -> StoreResult<u64> {
        let query = StructuredQuery::collection(COLLECTION)
            .order_desc("registrationNumber")
            .with_limit(1);
        let doc = self.client.find_one(query).await?;
        Ok(doc
            .as_ref()
            .and_then(|d| read_field::<u64>(d, "registrationNumber"))
            .unwrap_or(0))
    }

    /// 1-based waitlist position: prior waitlist entries plus one.
    pub async fn waitlist_position(&self, created_at: DateTime<Utc>) -> StoreResult<u64> {
        let query = StructuredQuery::collection(COLLECTION).with_filter(Filter::and(vec![
            Filter::eq("access", "waitlist".to_doc_value()),
            Filter::op("createdAt", "LESS_THAN", created_at.to_doc_value()),
        ]));
        Ok(self.client.count(query).await? + 1)
    }

    /// Oldest waitlisted user, the only promotion candidate.
    pub async fn oldest_waitlisted(&self) -> StoreResult<Option<UserRecord>> {
        let query = StructuredQuery::collection(COLLECTION)
            .with_filter(Filter::eq("access", "waitlist".to_doc_value()))
            .order_asc("createdAt");
        let doc = self.client.find_one(query).await?;
        doc.map(|d| document_to_user(&d)).transpose()
    }

    /// Promote a waitlisted user with a fresh ordinal. Guarded by an
    /// update-time precondition so two instances cannot double-promote.
    pub async fn promote(&self, subscriber_id: &str, ordinal: u64) -> StoreResult<bool> {
        let doc = self
            .client
            .get_document(COLLECTION, subscriber_id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("users/{}", subscriber_id)))?;

        let current = document_to_user(&doc)?;
        if current.access != AccessStatus::Waitlist {
            return Ok(false);
        }
        let update_time = doc
            .update_time
            .ok_or_else(|| StoreError::invalid_response("user document missing updateTime"))?;

        let mut fields = HashMap::new();
        fields.insert("access".to_string(), "active".to_doc_value());
        fields.insert("registrationNumber".to_string(), ordinal.to_doc_value());

        match self
            .client
            .update_document_with_precondition(
                COLLECTION,
                subscriber_id,
                fields,
                Some(vec!["access".to_string(), "registrationNumber".to_string()]),
                &update_time,
            )
            .await
        {
            Ok(_) => {
                info!(subscriber_id, ordinal, "Promoted user from waitlist");
                Ok(true)
            }
            Err(e) if e.is_precondition_failed() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn set_access(&self, subscriber_id: &str, access: AccessStatus) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("access".to_string(), access.as_str().to_doc_value());
        self.client
            .update_document(COLLECTION, subscriber_id, fields, Some(vec!["access".to_string()]))
            .await?;
        Ok(())
    }

    /// Bump request bookkeeping after an admitted request.
    pub async fn record_request(&self, subscriber_id: &str, request_count: u64) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("requestCount".to_string(), request_count.to_doc_value());
        fields.insert("lastRequestAt".to_string(), Utc::now().to_doc_value());
        self.client
            .update_document(
                COLLECTION,
                subscriber_id,
                fields,
                Some(vec!["requestCount".to_string(), "lastRequestAt".to_string()]),
            )
            .await?;
        Ok(())
    }
}

fn user_to_fields(user: &UserRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("subscriberId".to_string(), user.subscriber_id.to_doc_value());
    fields.insert("access".to_string(), user.access.as_str().to_doc_value());
    if let Some(n) = user.registration_number {
        fields.insert("registrationNumber".to_string(), n.to_doc_value());
    }
    fields.insert("requestCount".to_string(), user.request_count.to_doc_value());
    if let Some(t) = user.last_request_at {
        fields.insert("lastRequestAt".to_string(), t.to_doc_value());
    }
    fields.insert("createdAt".to_string(), user.created_at.to_doc_value());
    fields
}

fn document_to_user(doc: &Document) -> StoreResult<UserRecord> {
    let missing = |field: &str| StoreError::invalid_response(format!("user missing {}", field));

    let access_raw: String = read_field(doc, "access").ok_or_else(|| missing("access"))?;
    let access = AccessStatus::parse(&access_raw)
        .ok_or_else(|| StoreError::invalid_response(format!("bad access status {}", access_raw)))?;

    Ok(UserRecord {
        subscriber_id: read_field(doc, "subscriberId").ok_or_else(|| missing("subscriberId"))?,
        access,
        registration_number: read_field(doc, "registrationNumber"),
        request_count: read_field(doc, "requestCount").unwrap_or(0),
        last_request_at: read_field(doc, "lastRequestAt"),
        created_at: read_field(doc, "createdAt").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let user = UserRecord::active("12345", 42);
        let doc = Document::new(user_to_fields(&user));
        let back = document_to_user(&doc).unwrap();
        assert_eq!(back.subscriber_id, "12345");
        assert_eq!(back.access, AccessStatus::Active);
        assert_eq!(back.registration_number, Some(42));
    }

    #[test]
    fn test_waitlisted_user_has_no_ordinal() {
        let user = UserRecord::waitlisted("6789");
        let doc = Document::new(user_to_fields(&user));
        let back = document_to_user(&doc).unwrap();
        assert_eq!(back.access, AccessStatus::Waitlist);
        assert_eq!(back.registration_number, None);
    }
}
