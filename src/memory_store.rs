//! Process-local implementation of every repository
//!
//! Used by tests and by callers that do not need durability. Each entity lives
//! behind its own lock; the (owner, domain) uniqueness rule is enforced on
//! insert exactly as the SQL schema does it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{FootprintError, Result};
use crate::models::{
    EmailConnection, NewPrivacyRequest, NewRequestEvent, NewServiceAccount, OwnerId,
    PrivacyRequest, RequestEvent, RequestStatus, ServiceAccount,
};
use crate::repository::{
    ConnectionRepository, PrivacyRequestRepository, RequestEventRepository,
    ServiceAccountRepository,
};

#[derive(Debug)]
struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            rows: BTreeMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
struct ServiceTable {
    table: Table<ServiceAccount>,
    by_domain: HashMap<(OwnerId, String), i64>,
}

#[derive(Debug, Default)]
struct ConnectionTable {
    table: Table<EmailConnection>,
    by_owner: HashMap<(OwnerId, String), i64>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    services: Arc<Mutex<ServiceTable>>,
    requests: Arc<Mutex<Table<PrivacyRequest>>>,
    events: Arc<Mutex<Table<RequestEvent>>>,
    connections: Arc<Mutex<ConnectionTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceAccountRepository for MemoryStore {
    async fn insert_service(&self, account: NewServiceAccount) -> Result<ServiceAccount> {
        let mut services = self.services.lock().await;
        let key = (account.owner, account.domain.clone());
        if services.by_domain.contains_key(&key) {
            return Err(FootprintError::Conflict(format!(
                "service {} already exists for owner {}",
                account.domain, account.owner
            )));
        }

        let id = services.table.allocate_id();
        let row = ServiceAccount {
            id,
            owner: account.owner,
            domain: account.domain,
            name: account.name,
            first_seen: account.seen_at,
            last_seen: account.seen_at,
            evidence_count: 1,
        };
        services.by_domain.insert(key, id);
        services.table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get_service(&self, id: i64) -> Result<Option<ServiceAccount>> {
        Ok(self.services.lock().await.table.rows.get(&id).cloned())
    }

    async fn services_for_owner(&self, owner: OwnerId) -> Result<Vec<ServiceAccount>> {
        let services = self.services.lock().await;
        Ok(services
            .table
            .rows
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect())
    }

    async fn find_service_by_domain(
        &self,
        owner: OwnerId,
        domain: &str,
    ) -> Result<Option<ServiceAccount>> {
        let services = self.services.lock().await;
        Ok(services
            .by_domain
            .get(&(owner, domain.to_string()))
            .and_then(|id| services.table.rows.get(id))
            .cloned())
    }

    async fn record_evidence(&self, id: i64, seen_at: DateTime<Utc>) -> Result<ServiceAccount> {
        let mut services = self.services.lock().await;
        let row = services
            .table
            .rows
            .get_mut(&id)
            .ok_or_else(|| FootprintError::NotFound(format!("service account {}", id)))?;
        row.evidence_count += 1;
        row.last_seen = seen_at;
        Ok(row.clone())
    }
}

#[async_trait]
impl PrivacyRequestRepository for MemoryStore {
    async fn insert_request(&self, request: NewPrivacyRequest) -> Result<PrivacyRequest> {
        let mut requests = self.requests.lock().await;
        let id = requests.allocate_id();
        let row = PrivacyRequest {
            id,
            owner: request.owner,
            service_id: request.service_id,
            request_type: request.request_type,
            status: RequestStatus::Pending,
            thread_id: request.thread_id,
            message_id: request.message_id,
            created_at: request.created_at,
            updated_at: request.created_at,
        };
        requests.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get_request(&self, id: i64) -> Result<Option<PrivacyRequest>> {
        Ok(self.requests.lock().await.rows.get(&id).cloned())
    }

    async fn requests_for_owner(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        let requests = self.requests.lock().await;
        Ok(requests
            .rows
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }

    async fn requests_by_status(
        &self,
        owner: OwnerId,
        statuses: &[RequestStatus],
    ) -> Result<Vec<PrivacyRequest>> {
        let requests = self.requests.lock().await;
        Ok(requests
            .rows
            .values()
            .filter(|r| r.owner == owner && statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn open_requests_with_thread(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        let open = RequestStatus::open();
        let requests = self.requests.lock().await;
        Ok(requests
            .rows
            .values()
            .filter(|r| {
                r.owner == owner
                    && open.contains(&r.status)
                    && r.thread_id.as_deref().is_some_and(|t| !t.is_empty())
            })
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: i64,
        expected: RequestStatus,
        new_status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut requests = self.requests.lock().await;
        match requests.rows.get_mut(&id) {
            Some(row) if row.status == expected && !row.status.is_terminal() => {
                row.status = new_status;
                row.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FootprintError::NotFound(format!("privacy request {}", id))),
        }
    }
}

#[async_trait]
impl RequestEventRepository for MemoryStore {
    async fn append_event(&self, event: NewRequestEvent) -> Result<RequestEvent> {
        let mut events = self.events.lock().await;
        let id = events.allocate_id();
        let row = RequestEvent {
            id,
            request_id: event.request_id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: event.created_at,
        };
        events.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn events_for_request(&self, request_id: i64) -> Result<Vec<RequestEvent>> {
        let events = self.events.lock().await;
        let mut rows: Vec<RequestEvent> = events
            .rows
            .values()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.created_at, e.id));
        Ok(rows)
    }
}

#[async_trait]
impl ConnectionRepository for MemoryStore {
    async fn upsert_connection(
        &self,
        owner: OwnerId,
        provider: &str,
        refresh_token_encrypted: &str,
        scope: &str,
    ) -> Result<EmailConnection> {
        let mut connections = self.connections.lock().await;
        let key = (owner, provider.to_string());
        if let Some(id) = connections.by_owner.get(&key).copied() {
            if let Some(row) = connections.table.rows.get_mut(&id) {
                row.refresh_token_encrypted = refresh_token_encrypted.to_string();
                row.scope = scope.to_string();
                return Ok(row.clone());
            }
        }

        let id = connections.table.allocate_id();
        let row = EmailConnection {
            id,
            owner,
            provider: provider.to_string(),
            refresh_token_encrypted: refresh_token_encrypted.to_string(),
            scope: scope.to_string(),
            created_at: Utc::now(),
        };
        connections.by_owner.insert(key, id);
        connections.table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get_connection(
        &self,
        owner: OwnerId,
        provider: &str,
    ) -> Result<Option<EmailConnection>> {
        let connections = self.connections.lock().await;
        Ok(connections
            .by_owner
            .get(&(owner, provider.to_string()))
            .and_then(|id| connections.table.rows.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_service(owner: OwnerId, domain: &str) -> NewServiceAccount {
        NewServiceAccount {
            owner,
            domain: domain.to_string(),
            name: "Acme".to_string(),
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_service_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert_service(new_service(1, "acme.com")).await.unwrap();
        let err = store
            .insert_service(new_service(1, "acme.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, FootprintError::Conflict(_)));

        // Same domain for a different owner is a separate record
        assert!(store.insert_service(new_service(2, "acme.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_completed_request_is_never_updated() {
        let store = MemoryStore::new();
        let request = store
            .insert_request(NewPrivacyRequest {
                owner: 1,
                service_id: 1,
                request_type: crate::models::RequestType::DeleteClose,
                thread_id: Some("t1".to_string()),
                message_id: Some("m1".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store
            .update_status(request.id, RequestStatus::Pending, RequestStatus::Completed, Utc::now())
            .await
            .unwrap());
        assert!(!store
            .update_status(
                request.id,
                RequestStatus::Completed,
                RequestStatus::NeedsInfo,
                Utc::now()
            )
            .await
            .unwrap());
        let stored = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_connection_upsert_replaces_token() {
        let store = MemoryStore::new();
        let first = store
            .upsert_connection(1, "google", "token-a", "scope")
            .await
            .unwrap();
        let second = store
            .upsert_connection(1, "google", "token-b", "scope")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        let stored = store.get_connection(1, "google").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_encrypted, "token-b");
        assert!(store.get_connection(2, "google").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_store_starts_empty() {
        let store = MemoryStore::default();
        assert!(store.services_for_owner(1).await.unwrap().is_empty());
        let first = store.insert_service(new_service(1, "acme.com")).await.unwrap();
        assert_eq!(first.id, 1);
    }

    #[tokio::test]
    async fn test_requests_by_status_matches_any_listed_status() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for owner in [1, 1, 1, 2] {
            let request = store
                .insert_request(NewPrivacyRequest {
                    owner,
                    service_id: 1,
                    request_type: crate::models::RequestType::Unsubscribe,
                    thread_id: None,
                    message_id: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            ids.push(request.id);
        }
        store
            .update_status(ids[1], RequestStatus::Pending, RequestStatus::NeedsInfo, Utc::now())
            .await
            .unwrap();
        store
            .update_status(ids[2], RequestStatus::Pending, RequestStatus::Completed, Utc::now())
            .await
            .unwrap();

        let found: Vec<i64> = store
            .requests_by_status(1, &[RequestStatus::NeedsInfo, RequestStatus::Completed])
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found, vec![ids[1], ids[2]]);
        assert!(store.requests_by_status(1, &[]).await.unwrap().is_empty());
    }
}
