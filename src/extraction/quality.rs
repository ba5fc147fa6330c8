//! Deterministic tip quality rules, shared by extraction and curation.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::{slugify, Category};

pub const MIN_TIP_LEN: usize = 50;

/// Advice every guide gives; a tip containing any of these adds nothing
const GENERIC_PHRASES: &[&str] = &[
    "arrive early",
    "plan ahead",
    "be prepared",
    "pack light",
    "stay hydrated",
    "wear comfortable",
    "download the app",
    "make a reservation",
    "book in advance",
    "check the weather",
    "bring sunscreen",
    "bring a poncho",
    "stay cool",
    "take breaks",
    "be patient",
    "have fun",
    "enjoy yourself",
    "take your time",
];

static MERCHANDISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bis available\b",
        r"(?i)\bnow available\b",
        r"(?i)\bnew (shirt|ears|necklace|bag|backpack|loungefly|spirit jersey|merchandise)\b",
        r"(?i)\b(shirt|ears|jersey) is\b",
        r"(?i)themed (ears|merchandise|apparel)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("merchandise regex"))
    .collect()
});

static ACTIONABLE_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(try|get|use|ask|book|order|arrive|head|go|visit|check|grab|skip|avoid|consider|take|make sure|don't|do not)\b",
    )
    .expect("actionable verb regex")
});

static DISNEY_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(lightning lane|genie\+|rope drop|fireworks|parade|skyliner|monorail|magic kingdom|epcot|hollywood studios|animal kingdom)\b",
    )
    .expect("disney term regex")
});

/// Rule-based quality gate. Pure: the same text always gets the same answer.
///
/// Rejects generic advice, merchandise announcements and anything under
/// `MIN_TIP_LEN` characters, then requires an actionable verb or, failing
/// that, a Disney-specific term.
pub fn is_high_quality_tip(text: &str) -> bool {
    let lower = text.to_lowercase();

    if GENERIC_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return false;
    }
    if MERCHANDISE_PATTERNS.iter().any(|p| p.is_match(text)) {
        return false;
    }
    if text.trim().chars().count() < MIN_TIP_LEN {
        return false;
    }

    ACTIONABLE_VERB.is_match(text) || DISNEY_TERM.is_match(text)
}

/// Lowercase-hyphenated, deduplicated tags. A tip always keeps at least one
/// tag; with none usable it is tagged with its category.
pub fn normalize_tags(tags: &[String], category: Category) -> Vec<String> {
    let mut seen = HashSet::new();
    let normalized: Vec<String> = tags
        .iter()
        .map(|tag| slugify(tag))
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect();

    if normalized.is_empty() {
        vec![category.as_str().to_string()]
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_advice_rejected() {
        assert!(!is_high_quality_tip("Arrive early and plan ahead"));
        assert!(!is_high_quality_tip(
            "Make sure to stay hydrated while touring Magic Kingdom during the summer months."
        ));
    }

    #[test]
    fn test_specific_actionable_tip_accepted() {
        let tip = "Head to Seven Dwarfs Mine Train immediately at rope drop to avoid 90+ minute waits.";
        assert!(is_high_quality_tip(tip));
        // deterministic
        assert_eq!(is_high_quality_tip(tip), is_high_quality_tip(tip));
    }

    #[test]
    fn test_merchandise_rejected() {
        assert!(!is_high_quality_tip(
            "The new spirit jersey for the 50th anniversary is available at the Emporium now."
        ));
        assert!(!is_high_quality_tip(
            "These Haunted Mansion themed ears are the cutest thing we have seen all year long."
        ));
    }

    #[test]
    fn test_short_tip_rejected() {
        assert!(!is_high_quality_tip("Use Lightning Lane for Tron."));
    }

    #[test]
    fn test_disney_term_without_verb_accepted() {
        assert!(is_high_quality_tip(
            "The Skyliner station at Caribbean Beach connects to both EPCOT and the studios."
        ));
    }

    #[test]
    fn test_neither_verb_nor_term_rejected() {
        assert!(!is_high_quality_tip(
            "The churros near the Mexico pavilion were a little bit stale this afternoon, sadly."
        ));
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            "Rope Drop".to_string(),
            "rope_drop".to_string(),
            "Lightning Lane".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(normalize_tags(&tags, Category::Parks), vec!["rope-drop", "lightning-lane"]);
        assert_eq!(normalize_tags(&[], Category::Dining), vec!["dining"]);
    }
}
