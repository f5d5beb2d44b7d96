//! Deduplicated record of the services a user has email relationships with
//!
//! Every upsert funnels the raw sender domain through [`normalize_domain`], so
//! `mail.acme.com` and `login.acme.com` land on the same `acme.com` record.
//! Concurrent upserts for the same (owner, domain) race on the store's
//! uniqueness constraint; the loser of an insert race re-reads and bumps the
//! winner's record instead.

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{FootprintError, Result};
use crate::models::{NewServiceAccount, OwnerId, ServiceAccount};
use crate::parsing::normalize_domain;
use crate::repository::ServiceAccountRepository;

/// Insert attempts before a persistent conflict is surfaced
const MAX_UPSERT_ATTEMPTS: usize = 3;

pub struct ServiceRegistry<R> {
    repo: R,
}

impl<R: ServiceAccountRepository> ServiceRegistry<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Record one piece of evidence that `owner` has an account with the
    /// service behind `raw_domain`
    ///
    /// Creates the record on first sight with `proposed_name`; afterwards the
    /// name is left alone and only `last_seen` and `evidence_count` move.
    pub async fn upsert(
        &self,
        owner: OwnerId,
        raw_domain: &str,
        proposed_name: &str,
    ) -> Result<ServiceAccount> {
        let domain = normalize_domain(raw_domain);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let now = Utc::now();

            if let Some(existing) = self.repo.find_service_by_domain(owner, &domain).await? {
                let updated = self.repo.record_evidence(existing.id, now).await?;
                debug!(
                    "Service {} for owner {} now has {} evidence",
                    domain, owner, updated.evidence_count
                );
                return Ok(updated);
            }

            let new = NewServiceAccount {
                owner,
                domain: domain.clone(),
                name: proposed_name.to_string(),
                seen_at: now,
            };
            match self.repo.insert_service(new).await {
                Ok(created) => {
                    debug!("Discovered service {} ({}) for owner {}", created.name, domain, owner);
                    return Ok(created);
                }
                Err(FootprintError::Conflict(reason)) if attempt < MAX_UPSERT_ATTEMPTS => {
                    warn!(
                        "Concurrent insert of {} for owner {} (attempt {}): {}",
                        domain, owner, attempt, reason
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn list(&self, owner: OwnerId) -> Result<Vec<ServiceAccount>> {
        self.repo.services_for_owner(owner).await
    }

    /// Fetch a service owned by `owner`; unknown and foreign ids look the same
    pub async fn get(&self, owner: OwnerId, id: i64) -> Result<ServiceAccount> {
        match self.repo.get_service(id).await? {
            Some(service) if service.owner == owner => Ok(service),
            _ => Err(FootprintError::NotFound(format!("service account {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subdomains_collapse_to_one_record() {
        let registry = ServiceRegistry::new(MemoryStore::new());
        registry.upsert(1, "mail.acme.com", "Acme Mail").await.unwrap();
        let second = registry.upsert(1, "login.acme.com", "Acme Login").await.unwrap();

        assert_eq!(second.domain, "acme.com");
        assert_eq!(second.evidence_count, 2);
        assert_eq!(second.name, "Acme Mail");

        let all = registry.list(1).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_last_seen_advances_first_seen_fixed() {
        let registry = ServiceRegistry::new(MemoryStore::new());
        let first = registry.upsert(1, "acme.com", "Acme").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = registry.upsert(1, "acme.com", "Acme").await.unwrap();

        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen > first.last_seen);
        assert_eq!(first.first_seen, first.last_seen);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let registry = ServiceRegistry::new(MemoryStore::new());
        let mine = registry.upsert(1, "acme.com", "Acme").await.unwrap();
        let theirs = registry.upsert(2, "acme.com", "Acme").await.unwrap();

        assert_ne!(mine.id, theirs.id);
        assert_eq!(theirs.evidence_count, 1);
        assert!(matches!(
            registry.get(2, mine.id).await.unwrap_err(),
            FootprintError::NotFound(_)
        ));
        assert_eq!(registry.get(1, mine.id).await.unwrap().domain, "acme.com");
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = ServiceRegistry::new(MemoryStore::new());
        assert!(matches!(
            registry.get(1, 42).await.unwrap_err(),
            FootprintError::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_never_duplicate() {
        let registry = Arc::new(ServiceRegistry::new(MemoryStore::new()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let domain = format!("host{}.acme.com", i % 3);
                    registry.upsert(7, &domain, "Acme").await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let services = registry.list(7).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].evidence_count, 20);
    }
}
