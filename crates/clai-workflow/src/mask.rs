//! Secret masking for captured output, artifacts and LLM-bound text.

use crate::schema::{SecretDef, SecretSource};
use std::env;

pub const MASK: &str = "***";

/// Replaces known secret values with `***`. Values are ordered
/// longest-first so a longer secret containing a shorter one as a
/// substring still masks completely. Immutable after construction.
pub struct SecretMasker {
    values: Vec<String>,
}

impl SecretMasker {
    /// Build a masker from the workflow's secret declarations. Only
    /// `from: env` sources are honored in this version; the others are
    /// accepted but skipped.
    pub fn from_secrets(secrets: &[SecretDef]) -> Self {
        let mut values: Vec<String> = secrets
            .iter()
            .filter(|s| s.from == SecretSource::Env)
            .filter_map(|s| env::var(&s.name).ok())
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()));
        values.dedup();
        Self { values }
    }

    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.values {
            masked = masked.replace(value.as_str(), MASK);
        }
        masked
    }

    /// Byte-slice analogue of [`mask`](Self::mask); captured tails may
    /// not be valid UTF-8.
    pub fn mask_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        let mut masked = bytes.to_vec();
        for value in &self.values {
            masked = replace_bytes(&masked, value.as_bytes(), MASK.as_bytes());
        }
        masked
    }
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SecretDef;

    fn secret(name: &str) -> SecretDef {
        SecretDef {
            name: name.to_string(),
            from: SecretSource::Env,
            path: None,
        }
    }

    #[test]
    fn masks_declared_env_secret() {
        env::set_var("CLAI_TEST_MASK_A", "topsecretvalue42");
        let masker = SecretMasker::from_secrets(&[secret("CLAI_TEST_MASK_A")]);
        let masked = masker.mask("secret is topsecretvalue42");
        assert_eq!(masked, "secret is ***");
        assert!(!masked.contains("topsecretvalue42"));
    }

    #[test]
    fn longer_secret_masks_before_its_substring() {
        env::set_var("CLAI_TEST_MASK_LONG", "abc123xyz");
        env::set_var("CLAI_TEST_MASK_SHORT", "abc123");
        let masker = SecretMasker::from_secrets(&[
            secret("CLAI_TEST_MASK_SHORT"),
            secret("CLAI_TEST_MASK_LONG"),
        ]);
        assert_eq!(masker.mask("value abc123xyz end"), "value *** end");
    }

    #[test]
    fn masking_twice_equals_once() {
        env::set_var("CLAI_TEST_MASK_B", "hunter2");
        let masker = SecretMasker::from_secrets(&[secret("CLAI_TEST_MASK_B")]);
        let once = masker.mask("password hunter2 ok");
        assert_eq!(masker.mask(&once), once);
    }

    #[test]
    fn mask_bytes_handles_non_utf8_tails() {
        env::set_var("CLAI_TEST_MASK_C", "sekrit");
        let masker = SecretMasker::from_secrets(&[secret("CLAI_TEST_MASK_C")]);
        let mut input = vec![0xff, 0xfe];
        input.extend_from_slice(b"sekrit");
        input.push(0xff);
        let masked = masker.mask_bytes(&input);
        assert_eq!(masked, [&[0xff, 0xfe][..], &b"***"[..], &[0xff][..]].concat());
    }

    #[test]
    fn empty_masker_is_a_noop() {
        let masker = SecretMasker::empty();
        assert_eq!(masker.mask("anything at all"), "anything at all");
        assert_eq!(masker.mask_bytes(b"bytes"), b"bytes");
    }

    #[test]
    fn unset_env_var_contributes_nothing() {
        env::remove_var("CLAI_TEST_MASK_UNSET");
        let masker = SecretMasker::from_secrets(&[secret("CLAI_TEST_MASK_UNSET")]);
        assert!(masker.is_empty());
    }

    #[test]
    fn non_env_sources_are_skipped() {
        env::set_var("CLAI_TEST_MASK_D", "filevalue");
        let masker = SecretMasker::from_secrets(&[SecretDef {
            name: "CLAI_TEST_MASK_D".to_string(),
            from: SecretSource::File,
            path: Some("/tmp/secret".to_string()),
        }]);
        assert!(masker.is_empty());
    }
}
