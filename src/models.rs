use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FootprintError;

/// Identifier of the user owning a record
pub type OwnerId = i64;

/// Message headers keyed by header name, as returned by a metadata fetch
pub type HeaderMap = HashMap<String, String>;

/// A service the owner has an email relationship with, one per (owner, domain)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: i64,
    pub owner: OwnerId,
    /// Canonical domain produced by `parsing::normalize_domain`
    pub domain: String,
    /// Display name observed on the first matching message; never overwritten
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub evidence_count: u32,
}

#[derive(Debug, Clone)]
pub struct NewServiceAccount {
    pub owner: OwnerId,
    pub domain: String,
    pub name: String,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Unsubscribe,
    DeleteClose,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Unsubscribe => "unsubscribe",
            RequestType::DeleteClose => "delete_close",
        }
    }
}

impl FromStr for RequestType {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsubscribe" => Ok(RequestType::Unsubscribe),
            "delete_close" => Ok(RequestType::DeleteClose),
            other => Err(FootprintError::Validation(format!(
                "Invalid request type '{}'. Must be 'unsubscribe' or 'delete_close'",
                other
            ))),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Persisted lifecycle state of a privacy request
///
/// `Completed` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    NeedsInfo,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::NeedsInfo => "needs_info",
            RequestStatus::Completed => "completed",
        }
    }

    /// Statuses that are still waiting on the service's reply
    pub fn open() -> [RequestStatus; 2] {
        [RequestStatus::Pending, RequestStatus::NeedsInfo]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed)
    }

    /// Forward-only transition table
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        match (self, next) {
            (RequestStatus::Pending, RequestStatus::NeedsInfo) => true,
            (RequestStatus::Pending, RequestStatus::Completed) => true,
            (RequestStatus::NeedsInfo, RequestStatus::Completed) => true,
            _ => false,
        }
    }
}

impl FromStr for RequestStatus {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "needs_info" => Ok(RequestStatus::NeedsInfo),
            "completed" => Ok(RequestStatus::Completed),
            other => Err(FootprintError::Validation(format!(
                "Unknown request status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Legal regime cited in deletion requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Gdpr,
    Ccpa,
    Generic,
}

impl Regime {
    /// Unrecognised or absent values fall back to generic wording
    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("gdpr") => Regime::Gdpr,
            Some("ccpa") => Regime::Ccpa,
            _ => Regime::Generic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyRequest {
    pub id: i64,
    pub owner: OwnerId,
    pub service_id: i64,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPrivacyRequest {
    pub owner: OwnerId,
    pub service_id: i64,
    pub request_type: RequestType,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry attached to a privacy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: i64,
    pub request_id: i64,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRequestEvent {
    pub request_id: i64,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Stored provider credential; the refresh token is only ever held encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConnection {
    pub id: i64,
    pub owner: OwnerId,
    pub provider: String,
    pub refresh_token_encrypted: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

/// Rendered, unpersisted request email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
}

impl From<DraftEmail> for OutgoingEmail {
    fn from(draft: DraftEmail) -> Self {
        Self {
            to: draft.to,
            subject: draft.subject,
            body: draft.body,
            thread_id: None,
        }
    }
}

/// Correlation identifiers returned by the provider after a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub thread_id: String,
}

/// One message of a reply thread, oldest first within the thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub headers: Vec<(String, String)>,
}

impl ThreadMessage {
    /// Last value of the named header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
