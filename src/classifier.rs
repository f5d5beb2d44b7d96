//! Reply-thread classifier for privacy requests
//!
//! Only `Subject` headers are inspected. Body text is never fetched, so a
//! reply that confirms deletion only in its body goes unnoticed until a later
//! message says so in the subject.

use crate::models::{RequestStatus, ThreadMessage};

/// Subject fragments meaning the service has acted on the request
const COMPLETION_KEYWORDS: &[&str] = &["deleted", "removed", "closed your account"];

/// Subject fragments meaning the service wants something back from the user
const NEEDS_INFO_KEYWORDS: &[&str] = &["verify", "additional information"];

/// Heuristic mapping from a reply thread to a lifecycle signal
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusClassifier;

impl StatusClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a thread (oldest message first)
    ///
    /// Returns `None` when no subject carries a recognised signal. Completion
    /// wins over needs-info when both appear anywhere in the thread.
    pub fn evaluate(&self, thread: &[ThreadMessage]) -> Option<RequestStatus> {
        let combined = thread
            .iter()
            .filter_map(|m| m.header("Subject"))
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");

        if contains_any(&combined, COMPLETION_KEYWORDS) {
            Some(RequestStatus::Completed)
        } else if contains_any(&combined, NEEDS_INFO_KEYWORDS) {
            Some(RequestStatus::NeedsInfo)
        } else {
            None
        }
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}
