//! Outgoing request wording

use crate::models::{Regime, RequestType, ServiceAccount};

const SIGN_OFF: &str = "Please confirm once complete.\n\nThank you";

/// Subject and body for a request to `service`
///
/// Unsubscribe requests never mention a legal regime; deletion requests cite
/// GDPR or CCPA when asked to and fall back to neutral wording otherwise.
pub fn draft_template(
    service: &ServiceAccount,
    request_type: RequestType,
    regime: Regime,
) -> (String, String) {
    let subject = format!("Privacy request for {}", service.name);
    let greeting = format!("Hello {} team,\n\n", service.name);

    let body = match request_type {
        RequestType::Unsubscribe => format!(
            "{}Please unsubscribe me from all marketing emails and mailing lists. {}",
            greeting, SIGN_OFF
        ),
        RequestType::DeleteClose => {
            let legal_basis = match regime {
                Regime::Gdpr => "This request is made under GDPR. ",
                Regime::Ccpa => "This request is made under CCPA. ",
                Regime::Generic => "",
            };
            format!(
                "{}I am requesting deletion of my personal data and closure of my account. {}{}",
                greeting, legal_basis, SIGN_OFF
            )
        }
    };

    (subject, body)
}
