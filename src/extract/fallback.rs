//! Sender-domain heuristic used when the model call fails.

use std::sync::LazyLock;

use regex::Regex;

use super::ExtractedCompanyInfo;

pub(crate) const HEURISTIC_DESCRIPTION: &str = "Derived from sender email domain (heuristic fallback)";

/// RFC 5322 atext plus dots for the local part; letters, digits, dots and
/// hyphens for the domain.
const LOCAL_PART: &str = r"[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+";
const DOMAIN: &str = r"[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*";

static ANGLE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"<\s*({LOCAL_PART})@({DOMAIN})\s*>")).expect("valid angle address regex")
});

static BARE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({LOCAL_PART})@({DOMAIN})")).expect("valid bare address regex")
});

/// Build a minimal identity from a `From` header.
///
/// `"Jane Doe <jane@acme.io>"` → name `acme`, domain `acme.io`. The comment
/// form `jane@acme.io (Jane Doe)` is also understood. Returns `None` when the
/// header holds no recognizable address.
pub fn from_sender(from: &str) -> Option<ExtractedCompanyInfo> {
    let (captures, display_name) = match ANGLE_ADDRESS.captures(from) {
        Some(caps) => {
            let start = caps.get(0).map_or(0, |m| m.start());
            let name = from[..start].trim().trim_matches('"').trim();
            (caps, (!name.is_empty()).then(|| name.to_string()))
        }
        None => {
            let caps = BARE_ADDRESS.captures(from)?;
            let whole = caps.get(0)?;
            let rest = format!("{}{}", &from[..whole.start()], &from[whole.end()..]);
            let name = rest.trim_matches(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"'));
            (caps, (!name.is_empty()).then(|| name.to_string()))
        }
    };

    let local = captures.get(1)?.as_str();
    let domain = captures
        .get(2)?
        .as_str()
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let company_name = domain.split('.').next().filter(|l| !l.is_empty())?.to_string();

    Some(ExtractedCompanyInfo {
        company_url: None,
        company_name: Some(company_name),
        company_domain: Some(domain.clone()),
        sender_name: display_name,
        sender_email: Some(format!("{local}@{domain}")),
        brief_description: HEURISTIC_DESCRIPTION.to_string(),
    })
}
