//! Sender header parsing and domain normalization
//!
//! Turns a raw `From` header into the canonical domain used as a service
//! identity, plus a human display name.
//!
//! The domain reduction keeps the last two labels. It does not consult a
//! public suffix list, so `shop.example.co.uk` reduces to `co.uk`. Changing
//! that would regroup existing services, so the heuristic is kept as is.

/// Split a header into (display name, address part)
///
/// Handles `Display Name <local@domain>`, `"Quoted" <local@domain>`,
/// `<local@domain>` and bare `local@domain`.
fn split_header(from_header: &str) -> (&str, &str) {
    let header = from_header.trim();
    if let Some(start) = header.rfind('<') {
        let rest = &header[start + 1..];
        let address = match rest.find('>') {
            Some(end) => &rest[..end],
            None => rest,
        };
        let name = header[..start].trim().trim_matches('"').trim();
        return (name, address.trim());
    }
    ("", header)
}

/// Extract the lowercase domain from a `From` header
///
/// Returns an empty string when the address part has no `@`; callers skip those.
pub fn extract_domain(from_header: &str) -> String {
    let (_, address) = split_header(from_header);
    match address.rfind('@') {
        Some(at) => address[at + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// Reduce a domain to its last two labels
///
/// Domains with two or fewer non-empty labels are returned unchanged.
pub fn normalize_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return domain.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

/// Display name from the header, or the title-cased first label of the domain
///
/// Runs of whitespace and control characters in the display name collapse to
/// a single space, so a name never spans lines.
pub fn infer_service_name(from_header: &str, domain: &str) -> String {
    let (name, _) = split_header(from_header);
    let name = name
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !name.is_empty() {
        return name;
    }
    let base = normalize_domain(domain);
    let first = base.split('.').find(|l| !l.is_empty()).unwrap_or_default();
    title_case(first)
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("Acme <hello@sub.acme.com>"), "sub.acme.com");
        assert_eq!(extract_domain("hello@Acme.COM"), "acme.com");
        assert_eq!(extract_domain("<noreply@mail.example.org>"), "mail.example.org");
        assert_eq!(
            extract_domain("\"Acme, Inc.\" <team@acme.com>"),
            "acme.com"
        );
    }

    #[test]
    fn test_extract_domain_without_at_is_empty() {
        assert_eq!(extract_domain("Acme Team"), "");
        assert_eq!(extract_domain("Acme <undisclosed-recipients>"), "");
        assert_eq!(extract_domain(""), "");
    }

    #[test]
    fn test_extract_domain_uses_last_at() {
        assert_eq!(extract_domain("weird@local@Example.com"), "example.com");
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("sub.acme.com"), "acme.com");
        assert_eq!(normalize_domain("a.b.c.acme.com"), "acme.com");
        assert_eq!(normalize_domain("acme.com"), "acme.com");
        assert_eq!(normalize_domain("localhost"), "localhost");
        assert_eq!(normalize_domain("mail..acme.com"), "acme.com");
    }

    #[test]
    fn test_normalize_domain_ignores_public_suffixes() {
        // Two-label heuristic: multi-label public suffixes are not special-cased
        assert_eq!(normalize_domain("shop.example.co.uk"), "co.uk");
    }

    #[test]
    fn test_infer_service_name() {
        assert_eq!(
            infer_service_name("Acme Team <hello@acme.com>", "acme.com"),
            "Acme Team"
        );
        assert_eq!(infer_service_name("<hello@acme.com>", "acme.com"), "Acme");
        assert_eq!(
            infer_service_name("hello@mail.my-shop.com", "mail.my-shop.com"),
            "My-Shop"
        );
        assert_eq!(
            infer_service_name("\"  \" <x@news.github.com>", "news.github.com"),
            "Github"
        );
    }

    #[test]
    fn test_infer_service_name_flattens_line_breaks() {
        let from = "Acme\nBcc: attacker@evil.example <news@acme.com>";
        let name = infer_service_name(from, &extract_domain(from));
        assert_eq!(name, "Acme Bcc: attacker@evil.example");
        assert_eq!(
            infer_service_name("\"Acme\r\n\tTeam\" <a@acme.com>", "acme.com"),
            "Acme Team"
        );
        assert_eq!(infer_service_name("\r\n <a@acme.com>", "acme.com"), "Acme");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(domain in "[a-zA-Z0-9.-]{0,40}") {
            let once = normalize_domain(&domain);
            prop_assert_eq!(normalize_domain(&once), once);
        }

        #[test]
        fn prop_extract_domain_takes_suffix_after_last_at(
            local in "[a-zA-Z0-9._%+-]{1,16}",
            domain in "[a-zA-Z0-9.-]{0,24}",
        ) {
            let address = format!("{}@{}", local, domain);
            prop_assert_eq!(extract_domain(&address), domain.to_lowercase());
        }

        #[test]
        fn prop_extract_domain_without_at_is_empty(address in "[a-zA-Z0-9._%+-]{0,32}") {
            prop_assert_eq!(extract_domain(&address), "");
        }
    }
}
