//! Privacy request state machine
//!
//! ```text
//! draft (not persisted) -> pending -> needs_info -> completed
//!                                  \____________-> completed
//! ```
//!
//! Drafts are rendered on demand. A request row is written only once the
//! provider has accepted the outgoing message, and from then on only
//! [`RequestLifecycle::sync`] moves it forward. Every write to a request is
//! paired with an audit event.

use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::StatusClassifier;
use crate::client::{with_timeout, MailProvider};
use crate::error::{FootprintError, Result};
use crate::models::{
    DraftEmail, NewPrivacyRequest, NewRequestEvent, OwnerId, PrivacyRequest, Regime,
    RequestEvent, RequestStatus, RequestType, SentMessage,
};
use crate::registry::ServiceRegistry;
use crate::repository::{RequestStore, ServiceAccountRepository};
use crate::templates::draft_template;

pub const EVENT_SENT: &str = "sent";
pub const EVENT_SYNC: &str = "sync";

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Open requests whose thread was fetched
    pub checked: usize,
    /// Requests that changed status
    pub updated: usize,
}

pub struct RequestLifecycle<S> {
    store: S,
    registry: ServiceRegistry<S>,
    classifier: StatusClassifier,
}

impl<S> RequestLifecycle<S>
where
    S: RequestStore + ServiceAccountRepository + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            registry: ServiceRegistry::new(store.clone()),
            store,
            classifier: StatusClassifier::new(),
        }
    }

    /// Render the message that would be sent; nothing is stored
    pub async fn create_draft(
        &self,
        owner: OwnerId,
        service_id: i64,
        request_type: &str,
        regime: Option<&str>,
    ) -> Result<DraftEmail> {
        let request_type: RequestType = request_type.parse()?;
        let service = self.registry.get(owner, service_id).await?;

        let (subject, body) = draft_template(&service, request_type, Regime::from_option(regime));
        Ok(DraftEmail {
            to: format!("support@{}", service.domain),
            subject,
            body,
        })
    }

    /// Record a request the provider has already accepted
    ///
    /// Confirmation and the actual send are the caller's job; this only checks
    /// the request type and that `owner` owns the service.
    pub async fn send(
        &self,
        owner: OwnerId,
        service_id: i64,
        request_type: &str,
        sent: SentMessage,
    ) -> Result<PrivacyRequest> {
        let request_type: RequestType = request_type.parse()?;
        let service = self.registry.get(owner, service_id).await?;
        let now = Utc::now();

        let request = self
            .store
            .insert_request(NewPrivacyRequest {
                owner,
                service_id: service.id,
                request_type,
                thread_id: Some(sent.thread_id),
                message_id: Some(sent.message_id),
                created_at: now,
            })
            .await?;

        self.store
            .append_event(NewRequestEvent {
                request_id: request.id,
                event_type: EVENT_SENT.to_string(),
                payload: "{}".to_string(),
                created_at: now,
            })
            .await?;

        info!(
            "Recorded {} request {} to {} for owner {}",
            request_type, request.id, service.domain, owner
        );
        Ok(request)
    }

    /// Re-classify every open request of `owner` from its reply thread
    ///
    /// Requests are processed one at a time. Completed requests and requests
    /// without a thread are never fetched. The first provider failure aborts
    /// the pass; transitions already applied stay applied.
    pub async fn sync<P>(
        &self,
        owner: OwnerId,
        provider: &P,
        timeout: Duration,
    ) -> Result<SyncSummary>
    where
        P: MailProvider + ?Sized,
    {
        let candidates = self.store.open_requests_with_thread(owner).await?;
        let mut summary = SyncSummary::default();

        for request in candidates {
            let Some(thread_id) = request.thread_id.as_deref() else {
                continue;
            };

            let thread = with_timeout(timeout, provider.list_thread(thread_id)).await?;
            summary.checked += 1;

            let Some(next) = self.classifier.evaluate(&thread) else {
                debug!("Request {}: no signal in {} messages", request.id, thread.len());
                continue;
            };
            if next == request.status {
                continue;
            }
            if !request.status.can_transition_to(next) {
                debug!(
                    "Request {}: ignoring {} -> {}",
                    request.id, request.status, next
                );
                continue;
            }

            let now = Utc::now();
            let applied = self
                .store
                .update_status(request.id, request.status, next, now)
                .await?;
            if !applied {
                warn!(
                    "Request {} changed while syncing, leaving it as stored",
                    request.id
                );
                continue;
            }

            self.store
                .append_event(NewRequestEvent {
                    request_id: request.id,
                    event_type: EVENT_SYNC.to_string(),
                    payload: json!({ "from": request.status, "to": next }).to_string(),
                    created_at: now,
                })
                .await?;

            info!("Request {}: {} -> {}", request.id, request.status, next);
            summary.updated += 1;
        }

        Ok(summary)
    }

    pub async fn list(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        self.store.requests_for_owner(owner).await
    }

    /// Requests of `owner` in any of `statuses`; an empty filter lists everything
    pub async fn list_by_status(
        &self,
        owner: OwnerId,
        statuses: &[RequestStatus],
    ) -> Result<Vec<PrivacyRequest>> {
        if statuses.is_empty() {
            return self.list(owner).await;
        }
        self.store.requests_by_status(owner, statuses).await
    }

    /// Audit trail of one request, oldest first
    pub async fn events(&self, owner: OwnerId, request_id: i64) -> Result<Vec<RequestEvent>> {
        match self.store.get_request(request_id).await? {
            Some(request) if request.owner == owner => {
                self.store.events_for_request(request_id).await
            }
            _ => Err(FootprintError::NotFound(format!(
                "privacy request {}",
                request_id
            ))),
        }
    }
}
