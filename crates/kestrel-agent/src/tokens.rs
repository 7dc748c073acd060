//! Token counting for context budgets and result truncation.
//!
//! Uses the cl100k byte-pair encoder; when encoding fails (exotic input,
//! encoder unavailable) everything degrades to the classic 4-chars-per-token
//! estimate so budgeting keeps working.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "BPE encoder unavailable, using character estimates");
        None
    }
});

/// Count tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// Character-based estimate: 4 chars ≈ 1 token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Truncate `text` to at most `max_tokens` tokens, preserving a prefix.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    match ENCODER.as_ref() {
        Some(bpe) => {
            let tokens = bpe.encode_with_special_tokens(text);
            if tokens.len() <= max_tokens {
                return text.to_string();
            }
            match bpe.decode(tokens[..max_tokens].to_vec()) {
                Ok(prefix) => prefix,
                Err(_) => char_prefix(text, max_tokens * 4),
            }
        }
        None => char_prefix(text, max_tokens * 4),
    }
}

fn char_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_count_is_monotonic_in_length() {
        let short = count_tokens("hello world");
        let long = count_tokens(&"hello world ".repeat(50));
        assert!(long > short);
        assert!(short >= 1);
    }

    #[test]
    fn test_estimate_rule() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abc"), 0);
    }

    #[test]
    fn test_truncate_noop_under_limit() {
        let text = "a short sentence";
        assert_eq!(truncate_to_tokens(text, 1000), text);
    }

    #[test]
    fn test_truncate_shortens_and_preserves_prefix() {
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let out = truncate_to_tokens(&text, 10);
        assert!(count_tokens(&out) <= 10);
        assert!(text.starts_with(&out));
    }
}
