//! Title → grouping key.

use std::sync::LazyLock;

use regex::Regex;

/// Key for titles with nothing left after normalization.
pub const UNTITLED: &str = "_untitled_";

/// Longest key kept, in bytes. Truncation drops whole tokens.
pub const MAX_KEY_LEN: usize = 80;

/// Tokens that describe the medium, not the workflow.
const STOPWORDS: &[&str] = &[
    "n8n", "n8nio", "workflow", "workflows", "tutorial", "tutorials", "automation",
    "automations", "automate", "automating", "how", "to", "the", "a", "an", "with", "using",
    "in", "for", "and", "of", "on", "your", "my", "guide", "step", "by", "part", "video",
    "full", "easy", "free", "complete", "beginners", "beginner", "template",
];

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}]+").expect("valid separator regex"));

/// Canonicalize a raw title into a grouping key.
///
/// Lower-cases, collapses every run of characters that are not letters, marks
/// or digits into one space, drops [`STOPWORDS`], and keeps at most
/// [`MAX_KEY_LEN`] bytes of whole tokens. Anything that ends up empty becomes
/// [`UNTITLED`].
pub fn normalize(raw_title: &str) -> String {
    if raw_title == UNTITLED {
        return UNTITLED.to_string();
    }
    let lowered = raw_title.to_lowercase();
    let spaced = SEPARATORS.replace_all(&lowered, " ");

    let mut key = String::new();
    for token in spaced.split_whitespace() {
        if STOPWORDS.contains(&token) {
            continue;
        }
        if key.is_empty() {
            key.push_str(truncate_token(token));
            continue;
        }
        if key.len() + 1 + token.len() > MAX_KEY_LEN {
            break;
        }
        key.push(' ');
        key.push_str(token);
    }

    if key.is_empty() {
        UNTITLED.to_string()
    } else {
        key
    }
}

/// Token set of a key, as used for similarity.
pub fn tokens(key: &str) -> std::collections::BTreeSet<&str> {
    key.split(' ').filter(|t| !t.is_empty()).collect()
}

/// A single token longer than the limit is cut at a char boundary.
fn truncate_token(token: &str) -> &str {
    if token.len() <= MAX_KEY_LEN {
        return token;
    }
    let mut end = MAX_KEY_LEN;
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    &token[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_and_case_collapse() {
        assert_eq!(normalize("My Slack Bot Workflow"), "slack bot");
        assert_eq!(normalize("my slack bot workflow!!"), "slack bot");
        assert_eq!(normalize("  Slack---Bot  "), "slack bot");
    }

    #[test]
    fn stopwords_are_dropped() {
        assert_eq!(
            normalize("How to automate Gmail with n8n (Tutorial)"),
            "gmail"
        );
    }

    #[test]
    fn empty_and_stopword_only_titles_are_untitled() {
        assert_eq!(normalize(""), UNTITLED);
        assert_eq!(normalize("   \t "), UNTITLED);
        assert_eq!(normalize("n8n workflow tutorial"), UNTITLED);
        assert_eq!(normalize("!!!"), UNTITLED);
    }

    #[test]
    fn sentinel_is_a_fixed_point() {
        assert_eq!(normalize(UNTITLED), UNTITLED);
    }

    #[test]
    fn unicode_letters_survive() {
        assert_eq!(normalize("Café Börse → Telegram"), "café börse telegram");
        assert_eq!(normalize("टेलीग्राम बॉट"), normalize("टेलीग्राम  बॉट!"));
    }

    #[test]
    fn long_titles_truncate_on_token_boundaries() {
        let title = "alpha ".repeat(40);
        let key = normalize(&title);
        assert!(key.len() <= MAX_KEY_LEN);
        assert!(key.split(' ').all(|t| t == "alpha"));
        assert_eq!(normalize(&key), key);
    }

    #[test]
    fn oversized_single_token_is_cut() {
        let title = "x".repeat(200);
        let key = normalize(&title);
        assert_eq!(key.len(), MAX_KEY_LEN);
        assert_eq!(normalize(&key), key);
    }

    #[test]
    fn normalization_is_idempotent() {
        for title in [
            "My Slack Bot Workflow",
            "Sync Airtable → Google Sheets (n8n) | Part 2",
            "GPT-4o email triage",
            "",
            "the the the",
            "Ünïcödé   Tïtlé",
        ] {
            let once = normalize(title);
            assert_eq!(normalize(&once), once, "not idempotent for {title:?}");
        }
    }

    #[test]
    fn token_set_ignores_duplicates() {
        assert_eq!(tokens("slack bot slack").len(), 2);
    }
}
