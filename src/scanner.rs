//! Inbox scan that feeds sender domains into the service registry
//!
//! One search lists candidate messages, then metadata for each is fetched with
//! a bounded number of requests in flight. Re-running a scan is safe: repeat
//! evidence only raises counts on existing records.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{with_timeout, MailProvider};
use crate::config::ScanConfig;
use crate::error::Result;
use crate::models::{HeaderMap, OwnerId, ServiceAccount};
use crate::parsing::{extract_domain, infer_service_name};
use crate::registry::ServiceRegistry;
use crate::repository::ServiceAccountRepository;

/// Subject words typical of sign-up and account mail
const SIGNUP_KEYWORDS: &[&str] = &["welcome", "verify", "account", "subscription", "confirm"];

/// Provider search for account-related mail newer than `recency` (e.g. "1y")
pub fn build_scan_query(recency: &str) -> String {
    format!(
        "subject:({}) newer_than:{}",
        SIGNUP_KEYWORDS.join(" OR "),
        recency
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Messages whose metadata was fetched
    pub scanned: usize,
    /// Messages attributed to a service
    pub matched: usize,
    /// Messages with no usable sender domain
    pub skipped: usize,
}

pub struct Scanner<P, R> {
    provider: P,
    registry: ServiceRegistry<R>,
    config: ScanConfig,
    timeout: Duration,
}

impl<P, R> Scanner<P, R>
where
    P: MailProvider,
    R: ServiceAccountRepository,
{
    /// # Arguments
    /// * `timeout` - Deadline applied to each provider call
    pub fn new(provider: P, registry: ServiceRegistry<R>, config: ScanConfig, timeout: Duration) -> Self {
        Self {
            provider,
            registry,
            config,
            timeout,
        }
    }

    /// Attribute one message's headers to a service
    ///
    /// Returns `None` when the `From` header is missing or carries no domain.
    pub async fn process_headers(
        &self,
        owner: OwnerId,
        headers: &HeaderMap,
    ) -> Result<Option<ServiceAccount>> {
        let from = headers
            .get("From")
            .or_else(|| {
                headers
                    .iter()
                    .filter(|(name, _)| name.eq_ignore_ascii_case("From"))
                    .min_by(|a, b| a.0.cmp(b.0))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
            .unwrap_or("");

        let domain = extract_domain(from);
        if domain.is_empty() {
            debug!("Skipping message without sender domain: {:?}", from);
            return Ok(None);
        }

        let name = infer_service_name(from, &domain);
        let service = self.registry.upsert(owner, &domain, &name).await?;
        Ok(Some(service))
    }

    /// Scan `owner`'s mailbox; the first provider or storage failure aborts
    pub async fn scan(&self, owner: OwnerId) -> Result<ScanSummary> {
        let query = build_scan_query(&self.config.recency);
        info!("Scanning mailbox of owner {} with query {:?}", owner, query);

        let ids = with_timeout(self.timeout, self.provider.list_candidates(&query)).await?;
        info!("Found {} candidate messages", ids.len());

        let concurrency = self.config.max_concurrent_requests.max(1);
        let summary = stream::iter(ids)
            .map(|id| async move {
                let headers = with_timeout(self.timeout, self.provider.get_metadata(&id)).await?;
                self.process_headers(owner, &headers).await
            })
            .buffer_unordered(concurrency)
            .try_fold(ScanSummary::default(), |mut summary, outcome| async move {
                summary.scanned += 1;
                match outcome {
                    Some(_) => summary.matched += 1,
                    None => summary.skipped += 1,
                }
                Ok(summary)
            })
            .await?;

        info!(
            "Scan finished for owner {}: {} scanned, {} matched, {} skipped",
            owner, summary.scanned, summary.matched, summary.skipped
        );
        Ok(summary)
    }
}
