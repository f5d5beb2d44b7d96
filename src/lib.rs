//! Inbox Footprint
//!
//! Discovers which online services a user has email relationships with by
//! mining inbox metadata, and drives unsubscribe and deletion requests against
//! those services until a reply thread says they are done.
//!
//! # Overview
//!
//! - **Discovery**: sender headers are reduced to a canonical domain and folded
//!   into one deduplicated record per (owner, domain), safe under concurrent scans
//! - **Requests**: drafts are rendered from templates, sent through the mail
//!   provider, and then advanced by classifying the replies
//! - **Throttling**: fixed-window limits per user and action
//! - **Credentials**: refresh tokens are AES-GCM sealed at rest
//!
//! # Example Usage
//!
//! ```no_run
//! use inbox_footprint::{MemoryStore, RequestLifecycle, ServiceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryStore::new();
//!     let registry = ServiceRegistry::new(store.clone());
//!     let service = registry.upsert(1, "mail.acme.com", "Acme").await?;
//!
//!     let lifecycle = RequestLifecycle::new(store);
//!     let draft = lifecycle
//!         .create_draft(1, service.id, "delete_close", Some("gdpr"))
//!         .await?;
//!     println!("{}\n\n{}", draft.subject, draft.body);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`parsing`] - Sender header parsing and domain normalization
//! - [`registry`] - Deduplicated service records
//! - [`classifier`] - Reply-thread status classification
//! - [`templates`] - Request wording
//! - [`lifecycle`] - Privacy request state machine
//! - [`rate_limiter`] - Fixed-window throttling
//! - [`vault`] - Credential encryption
//! - [`connections`] - Stored mail-account connections
//! - [`scanner`] - Mailbox scan workflow
//! - [`jobs`] - Background job queue and worker
//! - [`client`] - Mail provider contract and Gmail implementation
//! - [`auth`] - OAuth2 hub construction
//! - [`repository`], [`memory_store`], `sqlite_store` - Persistence
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases

pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod connections;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod memory_store;
pub mod models;
pub mod parsing;
pub mod rate_limiter;
pub mod registry;
pub mod repository;
pub mod scanner;
pub mod templates;
pub mod vault;

#[cfg(feature = "sqlite")]
pub mod cli;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

// Re-export commonly used types for convenience
pub use error::{FootprintError, Result};

// Core data models
pub use models::{
    DraftEmail, OutgoingEmail, OwnerId, PrivacyRequest, Regime, RequestEvent, RequestStatus,
    RequestType, SentMessage, ServiceAccount, ThreadMessage,
};

pub use classifier::StatusClassifier;
pub use client::{with_timeout, GmailProvider, MailProvider};
pub use config::Config;
pub use connections::ConnectionManager;
pub use jobs::{ChannelQueue, Job, JobHandler, JobId, TaskQueue, Worker};
pub use lifecycle::{RequestLifecycle, SyncSummary};
pub use memory_store::MemoryStore;
pub use parsing::{extract_domain, infer_service_name, normalize_domain};
pub use rate_limiter::{Action, CounterStore, MemoryCounterStore, RateLimitKey, RateLimiter};
pub use registry::ServiceRegistry;
pub use repository::{
    ConnectionRepository, PrivacyRequestRepository, RequestEventRepository, RequestStore,
    ServiceAccountRepository,
};
pub use scanner::{build_scan_query, ScanSummary, Scanner};
pub use vault::SecretVault;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;
