//! Tool-result truncation — caps any single tool output to a fraction of
//! the context window so one oversized result cannot starve the turn.

use tracing::warn;

use crate::tokens;

/// Default share of the context window one tool result may occupy.
const DEFAULT_MAX_SHARE: f64 = 0.3;

/// Of the threshold, how much is kept when truncating.
const KEEP_RATIO: f64 = 0.8;

/// Truncates tool results against a token threshold.
pub struct ToolResultTruncator {
    threshold: usize,
}

impl ToolResultTruncator {
    pub fn new(max_tokens: usize, max_share: Option<f64>) -> Self {
        let share = max_share.unwrap_or(DEFAULT_MAX_SHARE);
        ToolResultTruncator {
            threshold: (max_tokens as f64 * share) as usize,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Cap `result` to the threshold. Under-threshold results pass through
    /// unchanged; over-threshold results keep their first 80% of the
    /// threshold and gain a warning naming the original and retained counts.
    pub fn truncate(&self, result: &str, tool_name: &str) -> String {
        let total = tokens::count_tokens(result);
        if total <= self.threshold {
            return result.to_string();
        }

        let keep = (self.threshold as f64 * KEEP_RATIO) as usize;
        warn!(
            tool = tool_name,
            tokens = total,
            keep = keep,
            "truncating oversized tool result"
        );

        let kept = tokens::truncate_to_tokens(result, keep);
        format!(
            "{kept}\n\n[Output truncated: {total} tokens exceeds limit of {threshold}. \
             Showing first {keep} tokens.]",
            threshold = self.threshold,
        )
    }

    /// Character-based fallback used when token counting is unavailable to
    /// the caller; same shape, chars instead of tokens.
    pub fn truncate_chars(&self, result: &str, _tool_name: &str) -> String {
        let max_chars = self.threshold * 4;
        if result.chars().count() <= max_chars {
            return result.to_string();
        }
        let keep = (max_chars as f64 * KEEP_RATIO) as usize;
        let kept: String = result.chars().take(keep).collect();
        format!(
            "{kept}\n\n[Output truncated: ~{} chars exceeds limit.]",
            result.chars().count()
        )
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::count_tokens;

    #[test]
    fn test_small_result_passes_through() {
        let truncator = ToolResultTruncator::new(128_000, None);
        let result = "a modest tool output";
        assert_eq!(truncator.truncate(result, "exec"), result);
    }

    #[test]
    fn test_default_threshold_is_30_percent() {
        let truncator = ToolResultTruncator::new(1000, None);
        assert_eq!(truncator.threshold(), 300);
    }

    #[test]
    fn test_oversized_result_capped_with_warning() {
        let truncator = ToolResultTruncator::new(1000, None); // threshold 300 tokens
        let threshold = truncator.threshold();

        // Build a result roughly twice the threshold.
        let word = "payload ";
        let mut result = String::new();
        while count_tokens(&result) < threshold * 2 {
            result.push_str(word);
        }

        let out = truncator.truncate(&result, "web_fetch");
        assert!(out.contains("Output truncated"));
        // Kept prefix (80% of threshold) plus the warning stays under cap.
        assert!(count_tokens(&out) <= threshold);

        // The kept prefix is verbatim.
        let kept_part = out.split("\n\n[Output truncated").next().unwrap();
        assert!(result.starts_with(kept_part));
    }

    #[test]
    fn test_warning_names_counts() {
        let truncator = ToolResultTruncator::new(100, None);
        let result = "tok ".repeat(500);
        let out = truncator.truncate(&result, "exec");
        let total = count_tokens(&result);
        assert!(out.contains(&format!("{total} tokens")));
        assert!(out.contains(&format!("limit of {}", truncator.threshold())));
    }

    #[test]
    fn test_custom_share() {
        let truncator = ToolResultTruncator::new(1000, Some(0.1));
        assert_eq!(truncator.threshold(), 100);
    }

    #[test]
    fn test_char_fallback() {
        let truncator = ToolResultTruncator::new(10, None); // 3 tokens → 12 chars
        let result = "x".repeat(100);
        let out = truncator.truncate_chars(&result, "exec");
        assert!(out.contains("chars exceeds limit"));
        assert!(out.starts_with("xxxxxxxxx"));
    }
}
