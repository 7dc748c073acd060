//! Resilience layer — API key rotation and model fallback.
//!
//! Two coordinated recovery mechanisms keep the loop answering through
//! provider trouble: auth/rate errors (401/403/429) rotate to the next
//! API key in the pool with a cooldown on the failed one; server errors
//! and timeouts advance along the model fallback chain. A success resets
//! the chain to the primary model.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use kestrel_providers::{LlmProvider, ProviderError};

/// How long a failed key sits out before it may be tried again.
const KEY_COOLDOWN: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────
// Key rotation
// ─────────────────────────────────────────────

/// Ordered API key pool with per-key cooldowns.
pub struct KeyRotator {
    keys: Vec<String>,
    current: usize,
    /// Key index → cooldown expiry.
    cooldowns: HashMap<usize, Instant>,
    cooldown: Duration,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Self {
        KeyRotator {
            keys,
            current: 0,
            cooldowns: HashMap::new(),
            cooldown: KEY_COOLDOWN,
        }
    }

    #[cfg(test)]
    fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn add_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !key.is_empty() && !self.keys.contains(&key) {
            self.keys.push(key);
            info!(pool = self.keys.len(), "API key added to rotation pool");
        }
    }

    /// The active key, skipping to an available one if the current key is
    /// cooling down.
    pub fn current_key(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }

        if let Some(expiry) = self.cooldowns.get(&self.current).copied() {
            if Instant::now() < expiry {
                if let Some(idx) = self.find_available() {
                    return Some(self.keys[idx].clone());
                }
            } else {
                self.cooldowns.remove(&self.current);
            }
        }
        Some(self.keys[self.current].clone())
    }

    /// Mark the current key failed and advance to the next available one.
    ///
    /// Returns the new active key, or `None` when every key is cooling down.
    pub fn rotate(&mut self, error_code: Option<u16>) -> Option<String> {
        if self.keys.len() <= 1 {
            warn!("cannot rotate: pool holds a single key");
            return self.current_key();
        }

        self.cooldowns
            .insert(self.current, Instant::now() + self.cooldown);

        match self.find_available() {
            Some(next) => {
                warn!(
                    from = self.current,
                    to = next,
                    error_code = ?error_code,
                    pool = self.keys.len(),
                    "rotated API key"
                );
                self.current = next;
                Some(self.keys[self.current].clone())
            }
            None => {
                error!("all API keys exhausted (cooling down)");
                None
            }
        }
    }

    /// Circular scan for the next key not on cooldown, starting after the
    /// current index. Expired cooldowns are cleaned up along the way.
    fn find_available(&mut self) -> Option<usize> {
        let now = Instant::now();
        for offset in 0..self.keys.len() {
            let idx = (self.current + 1 + offset) % self.keys.len();
            match self.cooldowns.get(&idx) {
                Some(expiry) if now < *expiry => continue,
                Some(_) => {
                    self.cooldowns.remove(&idx);
                    return Some(idx);
                }
                None => return Some(idx),
            }
        }
        None
    }

    pub fn pool_size(&self) -> usize {
        self.keys.len()
    }

    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        (0..self.keys.len())
            .filter(|idx| match self.cooldowns.get(idx) {
                Some(expiry) => now >= *expiry,
                None => true,
            })
            .count()
    }

    pub fn status_line(&self) -> String {
        format!(
            "Key pool: {}/{} available (active: #{})",
            self.available_count(),
            self.pool_size(),
            self.current
        )
    }
}

// ─────────────────────────────────────────────
// Model fallback
// ─────────────────────────────────────────────

/// Ordered model chain: primary first, fallbacks after.
pub struct ModelFallback {
    chain: Vec<String>,
    current: usize,
    attempts: usize,
    last_error: Option<String>,
}

impl ModelFallback {
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        let mut chain = vec![primary.into()];
        chain.extend(fallbacks);
        ModelFallback {
            chain,
            current: 0,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn current_model(&self) -> &str {
        &self.chain[self.current]
    }

    /// Advance one step along the chain. Returns the next model, or `None`
    /// when the chain is exhausted.
    pub fn fallback(&mut self, error: &str) -> Option<String> {
        self.last_error = Some(error.to_string());
        self.attempts += 1;

        if self.current + 1 < self.chain.len() {
            let from = self.chain[self.current].clone();
            self.current += 1;
            let to = self.chain[self.current].clone();
            warn!(from = %from, to = %to, "model fallback");
            Some(to)
        } else {
            error!(attempts = self.attempts, "model fallback chain exhausted");
            None
        }
    }

    /// Reset to the primary model after a successful response.
    pub fn reset(&mut self) {
        if self.current != 0 {
            info!(primary = %self.chain[0], "resetting to primary model");
        }
        self.current = 0;
        self.attempts = 0;
        self.last_error = None;
    }

    pub fn is_using_fallback(&self) -> bool {
        self.current > 0
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn status_line(&self) -> String {
        let chain = self
            .chain
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if i == self.current {
                    format!("[{m}]")
                } else {
                    m.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ");
        let state = if self.is_using_fallback() {
            "fallback"
        } else {
            "primary"
        };
        format!("Models ({state}): {chain}")
    }
}

// ─────────────────────────────────────────────
// Combined layer
// ─────────────────────────────────────────────

/// Recovery decision for one provider error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the same model with this key.
    RotatedKey(String),
    /// Retry with this model.
    ModelFallback(String),
    /// Nothing left to try; surface the error.
    Exhausted,
}

/// Coordinates key rotation and model fallback.
pub struct ResilienceLayer {
    pub keys: KeyRotator,
    pub models: ModelFallback,
    total_rotations: usize,
    total_fallbacks: usize,
}

impl ResilienceLayer {
    pub fn new(keys: Vec<String>, primary_model: impl Into<String>, fallbacks: Vec<String>) -> Self {
        ResilienceLayer {
            keys: KeyRotator::new(keys),
            models: ModelFallback::new(primary_model, fallbacks),
            total_rotations: 0,
            total_fallbacks: 0,
        }
    }

    /// Decide how to recover from `error`.
    ///
    /// Auth/rate errors (401/403/429) rotate the key and retry the same
    /// model. Retryable errors (5xx, timeout, connect) fall back to the
    /// next model. Permanent 4xx surfaces. Errors without an HTTP shape
    /// try fallback, then rotation, then surface.
    pub fn handle_error(&mut self, error: &ProviderError) -> RecoveryAction {
        if error.is_auth_or_rate() {
            if let Some(key) = self.keys.rotate(error.status_code()) {
                self.total_rotations += 1;
                return RecoveryAction::RotatedKey(key);
            }
            return RecoveryAction::Exhausted;
        }

        if error.is_retryable() {
            if let Some(model) = self.models.fallback(&error.to_string()) {
                self.total_fallbacks += 1;
                return RecoveryAction::ModelFallback(model);
            }
            return RecoveryAction::Exhausted;
        }

        match error {
            // Permanent 4xx: no local recovery.
            ProviderError::Status { .. } => RecoveryAction::Exhausted,
            // HTTP-less shapes: fallback if available, else rotation.
            _ => {
                if let Some(model) = self.models.fallback(&error.to_string()) {
                    self.total_fallbacks += 1;
                    RecoveryAction::ModelFallback(model)
                } else if let Some(key) = self.keys.rotate(None) {
                    self.total_rotations += 1;
                    RecoveryAction::RotatedKey(key)
                } else {
                    RecoveryAction::Exhausted
                }
            }
        }
    }

    /// Reset fallback state after a successful call.
    pub fn on_success(&mut self) {
        self.models.reset();
    }

    pub fn status(&self) -> String {
        format!(
            "Resilience status\n  {}\n  {}\n  Rotations: {} | Fallbacks: {}",
            self.keys.status_line(),
            self.models.status_line(),
            self.total_rotations,
            self.total_fallbacks,
        )
    }
}

// ─────────────────────────────────────────────
// Key bracket
// ─────────────────────────────────────────────

/// Capture-and-restore bracket around a provider's API key.
///
/// Construction swaps the rotated key in; drop restores the original, even
/// when the call in between returned early or failed.
pub struct KeyGuard<'a> {
    provider: &'a dyn LlmProvider,
    original: Option<String>,
}

impl<'a> KeyGuard<'a> {
    pub fn swap(provider: &'a dyn LlmProvider, key: &str) -> Self {
        let original = provider.api_key();
        provider.set_api_key(key);
        KeyGuard { provider, original }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Some(ref original) = self.original {
            self.provider.set_api_key(original);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use kestrel_providers::ProviderError;

    fn rate_limited() -> ProviderError {
        ProviderError::Status {
            code: 429,
            body: "rate limited".into(),
        }
    }

    fn server_down() -> ProviderError {
        ProviderError::Status {
            code: 503,
            body: "overloaded".into(),
        }
    }

    #[test]
    fn test_rotate_advances_and_cools() {
        let mut rotator = KeyRotator::new(vec!["k0".into(), "k1".into(), "k2".into()]);
        assert_eq!(rotator.current_key().as_deref(), Some("k0"));

        assert_eq!(rotator.rotate(Some(429)).as_deref(), Some("k1"));
        assert_eq!(rotator.available_count(), 2);
        assert_eq!(rotator.rotate(Some(429)).as_deref(), Some("k2"));
        assert_eq!(rotator.available_count(), 1);
    }

    #[test]
    fn test_rotate_exhausted_pool() {
        let mut rotator = KeyRotator::new(vec!["k0".into(), "k1".into()]);
        assert!(rotator.rotate(Some(401)).is_some());
        // Both keys now cooling (k0 cooled, k1 current then cooled).
        assert!(rotator.rotate(Some(401)).is_none());
    }

    #[test]
    fn test_single_key_never_rotates() {
        let mut rotator = KeyRotator::new(vec!["only".into()]);
        assert_eq!(rotator.rotate(Some(429)).as_deref(), Some("only"));
    }

    #[test]
    fn test_cooldown_expiry_restores_key() {
        let mut rotator = KeyRotator::new(vec!["k0".into(), "k1".into()])
            .with_cooldown(Duration::from_millis(0));
        rotator.rotate(Some(429));
        // Zero cooldown: k0 is immediately available again.
        assert_eq!(rotator.available_count(), 2);
        assert!(rotator.rotate(Some(429)).is_some());
    }

    #[test]
    fn test_add_key_deduplicates() {
        let mut rotator = KeyRotator::new(vec!["k0".into()]);
        rotator.add_key("k0");
        rotator.add_key("");
        rotator.add_key("k1");
        assert_eq!(rotator.pool_size(), 2);
    }

    #[test]
    fn test_fallback_chain_walk() {
        let mut models = ModelFallback::new("primary", vec!["backup-a".into(), "backup-b".into()]);
        assert_eq!(models.current_model(), "primary");
        assert!(!models.is_using_fallback());

        assert_eq!(models.fallback("503").as_deref(), Some("backup-a"));
        assert!(models.is_using_fallback());
        assert_eq!(models.fallback("503").as_deref(), Some("backup-b"));
        assert_eq!(models.fallback("503"), None);
    }

    #[test]
    fn test_fallback_reset_on_success() {
        let mut models = ModelFallback::new("primary", vec!["backup".into()]);
        models.fallback("err");
        models.reset();
        assert_eq!(models.current_model(), "primary");
        assert!(!models.is_using_fallback());
    }

    #[test]
    fn test_handle_error_rate_limit_rotates() {
        let mut layer =
            ResilienceLayer::new(vec!["k0".into(), "k1".into()], "primary", vec!["backup".into()]);
        match layer.handle_error(&rate_limited()) {
            RecoveryAction::RotatedKey(key) => assert_eq!(key, "k1"),
            other => panic!("expected rotation, got {other:?}"),
        }
        // Model chain untouched.
        assert_eq!(layer.models.current_model(), "primary");
    }

    #[test]
    fn test_handle_error_5xx_falls_back() {
        let mut layer = ResilienceLayer::new(vec!["k0".into()], "primary", vec!["backup".into()]);
        match layer.handle_error(&server_down()) {
            RecoveryAction::ModelFallback(model) => assert_eq!(model, "backup"),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_handle_error_timeout_falls_back() {
        let mut layer = ResilienceLayer::new(vec![], "primary", vec!["backup".into()]);
        assert_eq!(
            layer.handle_error(&ProviderError::Timeout),
            RecoveryAction::ModelFallback("backup".into())
        );
    }

    #[test]
    fn test_handle_error_exhausted() {
        let mut layer = ResilienceLayer::new(vec![], "only-model", vec![]);
        assert_eq!(layer.handle_error(&server_down()), RecoveryAction::Exhausted);
    }

    #[test]
    fn test_permanent_4xx_surfaces() {
        // A 400 is neither auth/rate nor retryable: no rotation, no
        // fallback, even when both are available.
        let mut layer =
            ResilienceLayer::new(vec!["k0".into(), "k1".into()], "primary", vec!["backup".into()]);
        let bad_request = ProviderError::Status {
            code: 400,
            body: "malformed".into(),
        };
        assert_eq!(layer.handle_error(&bad_request), RecoveryAction::Exhausted);
        assert_eq!(layer.models.current_model(), "primary");
    }

    #[test]
    fn test_http_less_error_falls_back_then_rotates() {
        let mut layer =
            ResilienceLayer::new(vec!["k0".into(), "k1".into()], "primary", vec![]);
        let odd = ProviderError::InvalidResponse("garbled".into());
        // No fallback models: rotation is the last resort.
        match layer.handle_error(&odd) {
            RecoveryAction::RotatedKey(key) => assert_eq!(key, "k1"),
            other => panic!("expected rotation, got {other:?}"),
        }
    }

    #[test]
    fn test_on_success_resets_models() {
        let mut layer = ResilienceLayer::new(vec![], "primary", vec!["backup".into()]);
        layer.handle_error(&server_down());
        assert!(layer.models.is_using_fallback());
        layer.on_success();
        assert!(!layer.models.is_using_fallback());
    }

    #[test]
    fn test_key_guard_restores_on_drop() {
        let provider = MockProvider::simple("ok");
        assert_eq!(provider.api_key().as_deref(), Some("sk-mock"));
        {
            let _guard = KeyGuard::swap(&provider, "sk-rotated");
            assert_eq!(provider.api_key().as_deref(), Some("sk-rotated"));
        }
        assert_eq!(provider.api_key().as_deref(), Some("sk-mock"));
    }

    #[test]
    fn test_key_guard_restores_on_panic_path() {
        let provider = MockProvider::simple("ok");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = KeyGuard::swap(&provider, "sk-temp");
            panic!("call blew up");
        }));
        assert!(result.is_err());
        assert_eq!(provider.api_key().as_deref(), Some("sk-mock"));
    }

    #[test]
    fn test_status_mentions_both_mechanisms() {
        let layer = ResilienceLayer::new(vec!["k0".into()], "primary", vec!["backup".into()]);
        let status = layer.status();
        assert!(status.contains("Key pool"));
        assert!(status.contains("primary"));
    }
}
