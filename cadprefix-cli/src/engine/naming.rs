use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::core::error::CampaignError;
use crate::core::DocumentKind;

/// Which part numbers qualify, and the prefix their files should carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixRule {
    /// Required first part-number token; `None` accepts any project code
    pub from: Option<String>,
    pub to: String,
}

impl PrefixRule {
    pub fn new(from: Option<&str>, to: &str) -> Result<Self, CampaignError> {
        let from = from.map(str::trim).filter(|f| !f.is_empty());
        if let Some(from) = from {
            validate_prefix(from)?;
        }
        validate_prefix(to.trim())?;
        Ok(Self {
            from: from.map(str::to_string),
            to: to.trim().to_string(),
        })
    }
}

fn validate_prefix(prefix: &str) -> Result<(), CampaignError> {
    let invalid = prefix.is_empty()
        || prefix
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '_' | '-'));
    if invalid {
        return Err(CampaignError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    /// No part number recorded, or it has no leading token
    MissingPartNumber,
    /// The first token is not the prefix being replaced
    PrefixMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingDecision {
    Rename { new_base: String },
    AlreadyCorrect,
    NotAMatch(MismatchReason),
}

fn old_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{2,}\d*_?").expect("valid old-prefix pattern"))
}

fn project_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z]{2,}\d*$").expect("valid project-code pattern"))
}

/// First `_`/`-` separated token of a part number
pub fn first_token(part_number: &str) -> Option<&str> {
    part_number
        .trim()
        .split(['_', '-'])
        .next()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Stem with a leading project code (`ABC_`, `PRJ12_`, `BASE_`) removed
pub fn strip_old_prefix(stem: &str) -> &str {
    let stripped = match old_prefix_pattern().find(stem) {
        Some(m) => &stem[m.end()..],
        None => stem,
    };
    stripped.trim_start_matches(['_', '-'])
}

/// Decide whether a document is renamed and to which base name.
///
/// `stem` is the current file name without extension.
pub fn evaluate(
    part_number: Option<&str>,
    stem: &str,
    kind: DocumentKind,
    rule: &PrefixRule,
) -> NamingDecision {
    let Some(token) = part_number.and_then(first_token) else {
        return NamingDecision::NotAMatch(MismatchReason::MissingPartNumber);
    };

    let matches = match &rule.from {
        Some(from) => token.eq_ignore_ascii_case(from),
        None => project_code_pattern().is_match(token),
    };
    if !matches {
        return NamingDecision::NotAMatch(MismatchReason::PrefixMismatch);
    }

    if has_prefix(stem, &rule.to) {
        return NamingDecision::AlreadyCorrect;
    }

    let remainder = match strip_old_prefix(stem) {
        "" => kind.placeholder_base(),
        rest => rest,
    };
    NamingDecision::Rename {
        new_base: format!("{}_{}", rule.to, remainder),
    }
}

/// `stem` is `prefix` itself or starts with `prefix_`, ignoring case
pub fn has_prefix(stem: &str, prefix: &str) -> bool {
    let stem = stem.to_lowercase();
    let prefix = prefix.to_lowercase();
    stem == prefix || stem.starts_with(&format!("{}_", prefix))
}

/// Part number carrying the new prefix in place of its first token
pub fn rewrite_part_number(part_number: &str, new_prefix: &str) -> String {
    let trimmed = part_number.trim();
    match trimmed.find(['_', '-']) {
        Some(index) => format!("{}{}", new_prefix, &trimmed[index..]),
        None => new_prefix.to_string(),
    }
}
