//! Join code manager: issues, validates, and expires admission tokens.

use std::collections::{HashMap, hash_map::Entry};

use tracing::{debug, info, warn};

use swarmgrid_core::*;

use crate::error::{AdmissionError, AdmissionResult};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are discarded so every character is equally likely.
const REJECT_ABOVE: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Draws before giving up on finding an unused code.
const MAX_DRAWS: u32 = 64;

/// Overrides for a single generated code. Unset fields fall back to config.
#[derive(Debug, Clone, Default)]
pub struct JoinCodeOptions {
    pub ttl_secs: Option<u64>,
    pub max_uses: Option<u32>,
    pub created_by: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl JoinCodeOptions {
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }
}

/// Live join codes keyed by code string.
#[derive(Debug, Default)]
pub struct JoinCodeManager {
    config: JoinCodeConfig,
    codes: HashMap<String, JoinCode>,
}

impl JoinCodeManager {
    pub fn new(config: JoinCodeConfig) -> Self {
        Self {
            config,
            codes: HashMap::new(),
        }
    }

    pub fn config(&self) -> &JoinCodeConfig {
        &self.config
    }

    /// Issue a fresh random code.
    pub fn generate_code(&mut self, options: JoinCodeOptions) -> AdmissionResult<String> {
        self.generate_code_at(options, epoch_millis())
    }

    pub fn generate_code_at(
        &mut self,
        options: JoinCodeOptions,
        now: u64,
    ) -> AdmissionResult<String> {
        let ttl_secs = options.ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let max_uses = options.max_uses.unwrap_or(self.config.default_max_uses);
        let created_by = options.created_by.unwrap_or_else(|| "system".to_string());

        let mut code = None;
        for _ in 0..MAX_DRAWS {
            let candidate = random_code(self.config.code_length)?;
            if !self.codes.contains_key(&candidate) {
                code = Some(candidate);
                break;
            }
            debug!("join code collision, drawing again");
        }
        let Some(code) = code else {
            warn!(
                code_length = self.config.code_length,
                live = self.codes.len(),
                "no unused join code found"
            );
            return Err(AdmissionError::CodeSpaceExhausted(MAX_DRAWS));
        };

        info!(%code, ttl_secs, max_uses, %created_by, "join code generated");
        self.codes.insert(
            code.clone(),
            JoinCode {
                code: code.clone(),
                created_at: now,
                expires_at: now.saturating_add(ttl_secs.saturating_mul(1000)),
                max_uses,
                used_count: 0,
                created_by,
                metadata: options.metadata,
            },
        );
        Ok(code)
    }

    /// Check a code without consuming it. Expired codes are evicted.
    pub fn validate_code(&mut self, code: &str) -> AdmissionResult<&JoinCode> {
        self.validate_code_at(code, epoch_millis())
    }

    pub fn validate_code_at(&mut self, code: &str, now: u64) -> AdmissionResult<&JoinCode> {
        let Entry::Occupied(entry) = self.codes.entry(code.to_string()) else {
            return Err(AdmissionError::NotFound);
        };

        if entry.get().is_expired(now) {
            entry.remove();
            info!(%code, "join code expired, evicted");
            return Err(AdmissionError::Expired);
        }
        if entry.get().is_exhausted() {
            return Err(AdmissionError::Exhausted);
        }
        Ok(entry.into_mut())
    }

    /// Validate and consume one use. The code is evicted once exhausted.
    pub fn use_code(&mut self, code: &str) -> AdmissionResult<()> {
        self.use_code_at(code, epoch_millis())
    }

    pub fn use_code_at(&mut self, code: &str, now: u64) -> AdmissionResult<()> {
        if let Err(e) = self.validate_code_at(code, now) {
            warn!(%code, error = %e, "join code refused");
            return Err(e);
        }

        let exhausted = match self.codes.get_mut(code) {
            Some(entry) => {
                entry.used_count += 1;
                debug!(%code, used = entry.used_count, max = entry.max_uses, "join code used");
                entry.is_exhausted()
            }
            None => return Err(AdmissionError::NotFound),
        };

        if exhausted {
            self.codes.remove(code);
            info!(%code, "join code exhausted, evicted");
        }
        Ok(())
    }

    /// Evict every expired code. Returns how many went.
    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(epoch_millis())
    }

    pub fn cleanup_expired_at(&mut self, now: u64) -> usize {
        let before = self.codes.len();
        self.codes.retain(|_, code| !code.is_expired(now));
        let removed = before - self.codes.len();
        if removed > 0 {
            info!(removed, "expired join codes cleaned up");
        }
        removed
    }

    /// Withdraw a code early.
    pub fn revoke(&mut self, code: &str) -> bool {
        let removed = self.codes.remove(code).is_some();
        if removed {
            info!(%code, "join code revoked");
        }
        removed
    }

    pub fn get(&self, code: &str) -> Option<&JoinCode> {
        self.codes.get(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Draw `length` uppercase alphanumeric characters from OS entropy.
fn random_code(length: usize) -> AdmissionResult<String> {
    let mut code = String::with_capacity(length);
    let mut buf = [0u8; 32];

    while code.len() < length {
        getrandom::getrandom(&mut buf).map_err(|e| AdmissionError::Entropy(e.to_string()))?;
        for &byte in buf.iter().filter(|b| **b < REJECT_ABOVE) {
            if code.len() == length {
                break;
            }
            code.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    fn manager() -> JoinCodeManager {
        JoinCodeManager::new(JoinCodeConfig::default())
    }

    #[test]
    fn generated_code_shape() {
        let mut m = manager();
        let code = m.generate_code_at(JoinCodeOptions::default(), 0).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        let entry = m.get(&code).unwrap();
        assert_eq!(entry.expires_at, 24 * HOUR_MS);
        assert_eq!(entry.max_uses, 100);
        assert_eq!(entry.created_by, "system");
    }

    #[test]
    fn options_override_defaults() {
        let mut m = manager();
        let opts = JoinCodeOptions::default()
            .with_ttl_secs(60)
            .with_max_uses(3)
            .with_created_by("operator");
        let code = m.generate_code_at(opts, 1_000).unwrap();

        let entry = m.get(&code).unwrap();
        assert_eq!(entry.expires_at, 61_000);
        assert_eq!(entry.max_uses, 3);
        assert_eq!(entry.created_by, "operator");
    }

    #[test]
    fn codes_are_distinct() {
        let mut m = manager();
        for _ in 0..50 {
            m.generate_code_at(JoinCodeOptions::default(), 0).unwrap();
        }
        assert_eq!(m.len(), 50);
    }

    #[test]
    fn huge_ttl_saturates() {
        let mut m = manager();
        let code = m
            .generate_code_at(JoinCodeOptions::default().with_ttl_secs(u64::MAX / 100), 1_000)
            .unwrap();
        assert_eq!(m.get(&code).unwrap().expires_at, u64::MAX);
        assert!(m.validate_code_at(&code, 2_000).is_ok());
    }

    #[test]
    fn full_code_space_is_an_error() {
        let mut m = JoinCodeManager::new(JoinCodeConfig {
            code_length: 0,
            ..JoinCodeConfig::default()
        });
        assert_eq!(m.generate_code_at(JoinCodeOptions::default(), 0).unwrap(), "");
        assert_eq!(
            m.generate_code_at(JoinCodeOptions::default(), 0).unwrap_err(),
            AdmissionError::CodeSpaceExhausted(MAX_DRAWS)
        );
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn validate_unknown_code() {
        let mut m = manager();
        assert_eq!(
            m.validate_code_at("NOPE42", 0).unwrap_err(),
            AdmissionError::NotFound
        );
    }

    #[test]
    fn validate_expired_code_evicts() {
        let mut m = manager();
        let code = m
            .generate_code_at(JoinCodeOptions::default().with_ttl_secs(10), 0)
            .unwrap();

        assert!(m.validate_code_at(&code, 9_999).is_ok());
        assert_eq!(
            m.validate_code_at(&code, 10_000).unwrap_err(),
            AdmissionError::Expired
        );
        assert!(m.get(&code).is_none());
    }

    #[test]
    fn validate_does_not_consume() {
        let mut m = manager();
        let code = m
            .generate_code_at(JoinCodeOptions::default().with_max_uses(1), 0)
            .unwrap();
        m.validate_code_at(&code, 1).unwrap();
        m.validate_code_at(&code, 2).unwrap();
        assert_eq!(m.get(&code).unwrap().used_count, 0);
    }

    #[test]
    fn single_use_code_exhausts() {
        let mut m = manager();
        let code = m
            .generate_code_at(JoinCodeOptions::default().with_max_uses(1), 0)
            .unwrap();

        m.use_code_at(&code, 1).unwrap();
        assert!(m.get(&code).is_none());

        let err = m.use_code_at(&code, 2).unwrap_err();
        assert_eq!(err, AdmissionError::NotFound);
        assert_eq!(err.to_string(), "not found");
    }

    #[test]
    fn use_counts_up_to_budget() {
        let mut m = manager();
        let code = m
            .generate_code_at(JoinCodeOptions::default().with_max_uses(3), 0)
            .unwrap();
        m.use_code_at(&code, 1).unwrap();
        m.use_code_at(&code, 2).unwrap();
        assert_eq!(m.get(&code).unwrap().used_count, 2);
        m.use_code_at(&code, 3).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let mut m = manager();
        let short = m
            .generate_code_at(JoinCodeOptions::default().with_ttl_secs(60), 0)
            .unwrap();
        let long = m.generate_code_at(JoinCodeOptions::default(), 0).unwrap();

        assert_eq!(m.cleanup_expired_at(HOUR_MS), 1);
        assert!(m.get(&short).is_none());
        assert!(m.get(&long).is_some());
    }

    #[test]
    fn revoke_removes_code() {
        let mut m = manager();
        let code = m.generate_code_at(JoinCodeOptions::default(), 0).unwrap();
        assert!(m.revoke(&code));
        assert!(!m.revoke(&code));
        assert_eq!(
            m.validate_code_at(&code, 0).unwrap_err(),
            AdmissionError::NotFound
        );
    }
}
