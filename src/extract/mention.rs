//! Company mentions in short free text ("Acme Robotics - acme.io").
//!
//! Used by the manual intake endpoint, where a person types a company name
//! rather than forwarding an email.

use std::sync::LazyLock;

use regex::Regex;

use super::ExtractedCompanyInfo;

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?([a-zA-Z0-9-]+(?:\.[a-zA-Z]{2,})+)").expect("valid url regex")
});

static KNOWN_TLD_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([a-zA-Z0-9-]+\.(?:com|io|co|ai|org|net|app))\b").expect("valid domain regex")
});

static ANY_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url tail regex"));

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid parenthetical regex"));

static DASH_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[-–—]\s*\S+\.\w+").expect("valid dash domain regex"));

/// A company name and domain parsed from a mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyMention {
    pub name: Option<String>,
    pub domain: Option<String>,
}

impl CompanyMention {
    pub fn into_company_info(self) -> ExtractedCompanyInfo {
        ExtractedCompanyInfo {
            company_url: self.domain.as_ref().map(|d| format!("https://{d}")),
            company_name: self.name,
            company_domain: self.domain,
            brief_description: "Submitted through manual intake".to_string(),
            ..Default::default()
        }
    }
}

/// Parse a mention. A URL wins over a bare domain; the name is whatever is
/// left once links, parentheticals and "- domain.tld" suffixes are removed.
pub fn parse_mention(text: &str) -> CompanyMention {
    let domain = URL
        .captures(text)
        .or_else(|| KNOWN_TLD_DOMAIN.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());

    let name = URL.replace_all(text.trim(), "");
    let name = ANY_URL.replace_all(&name, "");
    let name = PARENTHETICAL.replace_all(&name, "");
    let name = DASH_DOMAIN.replace_all(&name, "");
    let name = name
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | ':'))
        .to_string();

    let name = if name.is_empty() {
        domain.as_deref().and_then(title_case_first_label)
    } else {
        Some(name)
    };

    CompanyMention { name, domain }
}

fn title_case_first_label(domain: &str) -> Option<String> {
    let label = domain.split('.').next().filter(|l| !l.is_empty())?;
    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}
