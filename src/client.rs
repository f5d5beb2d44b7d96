//! Mail provider contract and its Gmail implementation
//!
//! The core only ever talks to a [`MailProvider`]; wire-level details stay in
//! [`GmailProvider`]. None of the calls here retry on their own. Callers wrap
//! each call in [`with_timeout`] and decide what to do with failures.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use google_gmail1::api::{Message, MessagePartHeader};
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::auth::{GmailHub, GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE};
use crate::error::{FootprintError, Result};
use crate::models::{HeaderMap, OutgoingEmail, SentMessage, ThreadMessage};

/// Operations the core needs from an email provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of messages matching a provider search query
    async fn list_candidates(&self, query: &str) -> Result<Vec<String>>;

    /// Header map of one message
    async fn get_metadata(&self, message_id: &str) -> Result<HeaderMap>;

    async fn send(&self, email: OutgoingEmail) -> Result<SentMessage>;

    /// Messages of a thread, oldest first
    async fn list_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}

#[async_trait]
impl<T: MailProvider + ?Sized> MailProvider for Arc<T> {
    async fn list_candidates(&self, query: &str) -> Result<Vec<String>> {
        self.as_ref().list_candidates(query).await
    }

    async fn get_metadata(&self, message_id: &str) -> Result<HeaderMap> {
        self.as_ref().get_metadata(message_id).await
    }

    async fn send(&self, email: OutgoingEmail) -> Result<SentMessage> {
        self.as_ref().send(email).await
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        self.as_ref().list_thread(thread_id).await
    }
}

/// Bound an external call; an elapsed deadline becomes [`FootprintError::Timeout`]
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(FootprintError::Timeout(duration.as_secs())),
    }
}

/// Gmail-backed provider with a cap on in-flight API calls
pub struct GmailProvider {
    hub: GmailHub,
    permits: Arc<Semaphore>,
    max_results: u32,
}

impl GmailProvider {
    /// # Arguments
    /// * `hub` - Authenticated Gmail hub
    /// * `max_concurrent` - Maximum in-flight API calls
    /// * `max_results` - Upper bound on candidates returned by one search
    pub fn new(hub: GmailHub, max_concurrent: usize, max_results: u32) -> Self {
        Self {
            hub,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_results,
        }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|e| FootprintError::ApiError(format!("Failed to acquire permit: {}", e)))
    }
}

fn collect_headers(headers: Option<Vec<MessagePartHeader>>) -> Vec<(String, String)> {
    headers
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| Some((h.name?, h.value.unwrap_or_default())))
        .collect()
}

fn message_headers(msg: Message) -> Vec<(String, String)> {
    collect_headers(msg.payload.and_then(|p| p.headers))
}

/// Header values must stay on one line
fn single_line<'a>(header: &str, value: &'a str) -> Result<&'a str> {
    if value.contains(['\r', '\n']) {
        return Err(FootprintError::InvalidMessageFormat(format!(
            "{} header contains a line break",
            header
        )));
    }
    Ok(value)
}

/// RFC 2047 encoded-word for non-ASCII subjects
fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", BASE64.encode(subject.as_bytes()))
    }
}

/// Render a plain-text RFC 822 message
pub(crate) fn render_rfc822(email: &OutgoingEmail) -> Result<String> {
    let to = single_line("To", &email.to)?;
    let subject = single_line("Subject", &email.subject)?;
    Ok(format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        to,
        encode_subject(subject),
        email.body.replace("\r\n", "\n").replace('\n', "\r\n")
    ))
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn list_candidates(&self, query: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = self.max_results.saturating_sub(ids.len() as u32);
            if remaining == 0 {
                break;
            }

            let _permit = self.permit().await?;
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(remaining.min(100));
            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(GMAIL_READONLY_SCOPE).doit().await?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("Query {:?} matched {} messages", query, ids.len());
        Ok(ids)
    }

    async fn get_metadata(&self, message_id: &str) -> Result<HeaderMap> {
        let _permit = self.permit().await?;
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("metadata")
            .add_metadata_headers("From")
            .add_metadata_headers("Subject")
            .add_scope(GMAIL_READONLY_SCOPE)
            .doit()
            .await?;

        Ok(message_headers(msg).into_iter().collect())
    }

    async fn send(&self, email: OutgoingEmail) -> Result<SentMessage> {
        let raw = render_rfc822(&email)?.into_bytes();
        let mime_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| FootprintError::InvalidMessageFormat(format!("{}", e)))?;
        let request = Message {
            thread_id: email.thread_id.clone(),
            ..Default::default()
        };

        let _permit = self.permit().await?;
        let (_, sent) = self
            .hub
            .users()
            .messages_send(request, "me")
            .add_scope(GMAIL_SEND_SCOPE)
            .upload(Cursor::new(raw), mime_type)
            .await?;

        let message_id = sent.id.ok_or_else(|| {
            FootprintError::InvalidMessageFormat("Sent message has no id".to_string())
        })?;
        let thread_id = sent.thread_id.unwrap_or_else(|| message_id.clone());
        info!("Sent message {} to {} (thread {})", message_id, email.to, thread_id);

        Ok(SentMessage {
            message_id,
            thread_id,
        })
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let _permit = self.permit().await?;
        let (_, thread) = self
            .hub
            .users()
            .threads_get("me", thread_id)
            .format("metadata")
            .add_metadata_headers("From")
            .add_metadata_headers("Subject")
            .add_scope(GMAIL_READONLY_SCOPE)
            .doit()
            .await?;

        Ok(thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|msg| ThreadMessage {
                id: msg.id.clone().unwrap_or_default(),
                headers: message_headers(msg),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, FootprintError>("too slow")
        };
        let err = with_timeout(Duration::from_millis(20), slow).await.unwrap_err();
        assert!(matches!(err, FootprintError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let fast = async { Ok::<_, FootprintError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await.unwrap(), 7);

        let failing = async { Err::<u8, _>(FootprintError::Forbidden("nope".to_string())) };
        let err = with_timeout(Duration::from_secs(1), failing).await.unwrap_err();
        assert!(matches!(err, FootprintError::Forbidden(_)));
    }

    #[test]
    fn test_collect_headers_skips_nameless() {
        let headers = vec![
            MessagePartHeader {
                name: Some("From".to_string()),
                value: Some("Acme <news@acme.com>".to_string()),
            },
            MessagePartHeader {
                name: None,
                value: Some("orphan".to_string()),
            },
            MessagePartHeader {
                name: Some("Subject".to_string()),
                value: None,
            },
        ];
        let collected = collect_headers(Some(headers));
        assert_eq!(
            collected,
            vec![
                ("From".to_string(), "Acme <news@acme.com>".to_string()),
                ("Subject".to_string(), String::new()),
            ]
        );
        assert!(collect_headers(None).is_empty());
    }

    #[test]
    fn test_render_rfc822() {
        let email = OutgoingEmail {
            to: "support@acme.com".to_string(),
            subject: "Privacy request for Acme".to_string(),
            body: "Hello\n\nThanks".to_string(),
            thread_id: None,
        };
        let raw = render_rfc822(&email).unwrap();
        assert!(raw.starts_with("To: support@acme.com\r\nSubject: Privacy request for Acme\r\n"));
        assert!(raw.ends_with("\r\n\r\nHello\r\n\r\nThanks"));
    }

    #[test]
    fn test_render_rejects_header_line_breaks() {
        let mut email = OutgoingEmail {
            to: "support@acme.com".to_string(),
            subject: "Privacy request for Acme\nBcc: attacker@evil.example".to_string(),
            body: "Hello".to_string(),
            thread_id: None,
        };
        let err = render_rfc822(&email).unwrap_err();
        assert!(matches!(err, FootprintError::InvalidMessageFormat(_)));

        email.subject = "Privacy request".to_string();
        email.to = "support@acme.com\r\nBcc: attacker@evil.example".to_string();
        assert!(render_rfc822(&email).is_err());
    }

    #[test]
    fn test_render_encodes_non_ascii_subject() {
        let email = OutgoingEmail {
            to: "support@cafe.fr".to_string(),
            subject: "Privacy request for Café".to_string(),
            body: String::new(),
            thread_id: None,
        };
        let raw = render_rfc822(&email).unwrap();
        let expected = format!(
            "Subject: =?UTF-8?B?{}?=\r\n",
            BASE64.encode("Privacy request for Café")
        );
        assert!(raw.contains(&expected));
    }
}
