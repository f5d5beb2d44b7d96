//! Persistence contracts, one trait per entity
//!
//! Implementations must enforce uniqueness of `(owner, domain)` for service
//! accounts and report a duplicate insert as [`FootprintError::Conflict`];
//! the registry relies on that to stay deduplicated under concurrent scans.
//!
//! [`FootprintError::Conflict`]: crate::error::FootprintError::Conflict

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    EmailConnection, NewPrivacyRequest, NewRequestEvent, NewServiceAccount, OwnerId,
    PrivacyRequest, RequestEvent, RequestStatus, ServiceAccount,
};

#[async_trait]
pub trait ServiceAccountRepository: Send + Sync {
    /// Insert with `evidence_count = 1`; fails with `Conflict` if (owner, domain) exists
    async fn insert_service(&self, account: NewServiceAccount) -> Result<ServiceAccount>;

    async fn get_service(&self, id: i64) -> Result<Option<ServiceAccount>>;

    async fn services_for_owner(&self, owner: OwnerId) -> Result<Vec<ServiceAccount>>;

    async fn find_service_by_domain(
        &self,
        owner: OwnerId,
        domain: &str,
    ) -> Result<Option<ServiceAccount>>;

    /// Atomically add one to `evidence_count` and set `last_seen`
    async fn record_evidence(&self, id: i64, seen_at: DateTime<Utc>) -> Result<ServiceAccount>;
}

#[async_trait]
pub trait PrivacyRequestRepository: Send + Sync {
    /// Insert in status `Pending`
    async fn insert_request(&self, request: NewPrivacyRequest) -> Result<PrivacyRequest>;

    async fn get_request(&self, id: i64) -> Result<Option<PrivacyRequest>>;

    async fn requests_for_owner(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>>;

    async fn requests_by_status(
        &self,
        owner: OwnerId,
        statuses: &[RequestStatus],
    ) -> Result<Vec<PrivacyRequest>>;

    /// Requests still awaiting a reply that carry a provider thread id
    async fn open_requests_with_thread(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>>;

    /// Compare-and-set the status; returns false when the stored status is no
    /// longer `expected`
    async fn update_status(
        &self,
        id: i64,
        expected: RequestStatus,
        new_status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait RequestEventRepository: Send + Sync {
    async fn append_event(&self, event: NewRequestEvent) -> Result<RequestEvent>;

    /// Events in creation order
    async fn events_for_request(&self, request_id: i64) -> Result<Vec<RequestEvent>>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert or replace the connection for (owner, provider)
    async fn upsert_connection(
        &self,
        owner: OwnerId,
        provider: &str,
        refresh_token_encrypted: &str,
        scope: &str,
    ) -> Result<EmailConnection>;

    async fn get_connection(&self, owner: OwnerId, provider: &str)
        -> Result<Option<EmailConnection>>;
}

/// Everything the request lifecycle needs from storage
pub trait RequestStore: PrivacyRequestRepository + RequestEventRepository {}

impl<T: PrivacyRequestRepository + RequestEventRepository> RequestStore for T {}

#[async_trait]
impl<T: ServiceAccountRepository + ?Sized> ServiceAccountRepository for Arc<T> {
    async fn insert_service(&self, account: NewServiceAccount) -> Result<ServiceAccount> {
        self.as_ref().insert_service(account).await
    }

    async fn get_service(&self, id: i64) -> Result<Option<ServiceAccount>> {
        self.as_ref().get_service(id).await
    }

    async fn services_for_owner(&self, owner: OwnerId) -> Result<Vec<ServiceAccount>> {
        self.as_ref().services_for_owner(owner).await
    }

    async fn find_service_by_domain(
        &self,
        owner: OwnerId,
        domain: &str,
    ) -> Result<Option<ServiceAccount>> {
        self.as_ref().find_service_by_domain(owner, domain).await
    }

    async fn record_evidence(&self, id: i64, seen_at: DateTime<Utc>) -> Result<ServiceAccount> {
        self.as_ref().record_evidence(id, seen_at).await
    }
}

#[async_trait]
impl<T: PrivacyRequestRepository + ?Sized> PrivacyRequestRepository for Arc<T> {
    async fn insert_request(&self, request: NewPrivacyRequest) -> Result<PrivacyRequest> {
        self.as_ref().insert_request(request).await
    }

    async fn get_request(&self, id: i64) -> Result<Option<PrivacyRequest>> {
        self.as_ref().get_request(id).await
    }

    async fn requests_for_owner(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        self.as_ref().requests_for_owner(owner).await
    }

    async fn requests_by_status(
        &self,
        owner: OwnerId,
        statuses: &[RequestStatus],
    ) -> Result<Vec<PrivacyRequest>> {
        self.as_ref().requests_by_status(owner, statuses).await
    }

    async fn open_requests_with_thread(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        self.as_ref().open_requests_with_thread(owner).await
    }

    async fn update_status(
        &self,
        id: i64,
        expected: RequestStatus,
        new_status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.as_ref().update_status(id, expected, new_status, at).await
    }
}

#[async_trait]
impl<T: RequestEventRepository + ?Sized> RequestEventRepository for Arc<T> {
    async fn append_event(&self, event: NewRequestEvent) -> Result<RequestEvent> {
        self.as_ref().append_event(event).await
    }

    async fn events_for_request(&self, request_id: i64) -> Result<Vec<RequestEvent>> {
        self.as_ref().events_for_request(request_id).await
    }
}

#[async_trait]
impl<T: ConnectionRepository + ?Sized> ConnectionRepository for Arc<T> {
    async fn upsert_connection(
        &self,
        owner: OwnerId,
        provider: &str,
        refresh_token_encrypted: &str,
        scope: &str,
    ) -> Result<EmailConnection> {
        self.as_ref()
            .upsert_connection(owner, provider, refresh_token_encrypted, scope)
            .await
    }

    async fn get_connection(
        &self,
        owner: OwnerId,
        provider: &str,
    ) -> Result<Option<EmailConnection>> {
        self.as_ref().get_connection(owner, provider).await
    }
}
