//! Common test utilities and fixtures

#![allow(dead_code)]

use inbox_footprint::error::Result;
use inbox_footprint::models::{HeaderMap, OutgoingEmail, SentMessage, ThreadMessage};
use inbox_footprint::MailProvider;
use mockall::mock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 32-byte AES key in hex
pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Metadata headers as returned for a scanned message
pub fn headers(from: &str, subject: &str) -> HeaderMap {
    HeaderMap::from([
        ("From".to_string(), from.to_string()),
        ("Subject".to_string(), subject.to_string()),
    ])
}

/// One reply in a thread
pub fn reply(id: &str, subject: &str) -> ThreadMessage {
    ThreadMessage {
        id: id.to_string(),
        headers: vec![
            ("From".to_string(), "support@acme.com".to_string()),
            ("Subject".to_string(), subject.to_string()),
        ],
    }
}

pub fn sent(message_id: &str, thread_id: &str) -> SentMessage {
    SentMessage {
        message_id: message_id.to_string(),
        thread_id: thread_id.to_string(),
    }
}

const SERVICES: &[&str] = &["acme", "globex", "initech", "umbrella", "hooli", "stark"];
const SUBDOMAINS: &[&str] = &["", "mail.", "news.", "login.", "billing.eu."];

/// Deterministic mailbox of `count` messages as (id, From header)
///
/// Senders are spread over a fixed set of services with random subdomains,
/// so every message normalizes to one of `SERVICES.len()` domains.
pub fn generate_mailbox(seed: u64, count: usize) -> Vec<(String, String)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let service = SERVICES[rng.gen_range(0..SERVICES.len())];
            let subdomain = SUBDOMAINS[rng.gen_range(0..SUBDOMAINS.len())];
            let from = if rng.gen_bool(0.5) {
                format!("{} <no-reply@{}{}.com>", service, subdomain, service)
            } else {
                format!("hello@{}{}.com", subdomain, service)
            };
            (format!("msg_{:05}", i), from)
        })
        .collect()
}

// Mock implementation of MailProvider for testing
mock! {
    pub MailProvider {}

    #[async_trait::async_trait]
    impl MailProvider for MailProvider {
        async fn list_candidates(&self, query: &str) -> Result<Vec<String>>;
        async fn get_metadata(&self, message_id: &str) -> Result<HeaderMap>;
        async fn send(&self, email: OutgoingEmail) -> Result<SentMessage>;
        async fn list_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_fixture() {
        let h = headers("Acme <hi@acme.com>", "Welcome");
        assert_eq!(h.get("From").map(String::as_str), Some("Acme <hi@acme.com>"));
    }

    #[test]
    fn test_generated_mailbox_is_deterministic() {
        assert_eq!(generate_mailbox(7, 20), generate_mailbox(7, 20));
        assert_eq!(generate_mailbox(7, 20).len(), 20);
    }

    #[test]
    fn test_reply_fixture() {
        assert_eq!(reply("r1", "Deleted").header("subject"), Some("Deleted"));
    }
}
