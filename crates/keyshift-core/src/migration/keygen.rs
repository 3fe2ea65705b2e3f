//! Identifier generation and format checks.

use uuid::{Uuid, Variant};

/// Length of a canonical hyphenated identifier.
pub const IDENTIFIER_LEN: usize = 36;

/// The all-zero identifier, treated as nil.
pub const NIL_IDENTIFIER: &str = "00000000-0000-0000-0000-000000000000";

/// Source of fresh primary-key identifiers.
pub trait KeyGenerator: Send + Sync {
    /// Produce a new identifier.
    fn generate(&self) -> String;
}

/// Random (v4) UUID generator backed by the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl KeyGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().hyphenated().to_string()
    }
}

/// Check that `candidate` is a canonical 8-4-4-4-12 v4 UUID.
///
/// The version nibble must be `4` and the variant nibble one of `8`, `9`,
/// `a`, `b`. Hex digits may be either case; braces, URNs and the simple
/// (unhyphenated) form are rejected.
pub fn is_valid(candidate: &str) -> bool {
    if candidate.len() != IDENTIFIER_LEN {
        return false;
    }
    let bytes = candidate.as_bytes();
    if [8, 13, 18, 23].iter().any(|&i| bytes[i] != b'-') {
        return false;
    }
    match Uuid::try_parse(candidate) {
        Ok(uuid) => uuid.get_version_num() == 4 && uuid.get_variant() == Variant::RFC4122,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_identifiers_are_valid() {
        let generator = UuidGenerator;
        let ids: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| is_valid(id)));
    }

    #[test]
    fn test_accepts_canonical_layout() {
        assert!(is_valid("3f2504e0-4f89-41d3-9a0c-0305e82c3301"));
        assert!(is_valid("3F2504E0-4F89-41D3-BA0C-0305E82C3301"));
        for variant in ['8', '9', 'a', 'b'] {
            let id = format!("3f2504e0-4f89-41d3-{variant}a0c-0305e82c3301");
            assert!(is_valid(&id), "{id}");
        }
    }

    #[test]
    fn test_rejects_wrong_version_and_variant() {
        // version 1
        assert!(!is_valid("3f2504e0-4f89-11d3-9a0c-0305e82c3301"));
        // variant nibble c
        assert!(!is_valid("3f2504e0-4f89-41d3-ca0c-0305e82c3301"));
        // variant nibble 7
        assert!(!is_valid("3f2504e0-4f89-41d3-7a0c-0305e82c3301"));
        assert!(!is_valid(NIL_IDENTIFIER));
    }

    #[test]
    fn test_rejects_other_layouts() {
        assert!(!is_valid(""));
        assert!(!is_valid("42"));
        assert!(!is_valid("3f2504e04f8941d39a0c0305e82c3301"));
        assert!(!is_valid("{3f2504e0-4f89-41d3-9a0c-0305e82c3301}"));
        assert!(!is_valid("urn:uuid:3f2504e0-4f89-41d3-9a0c-0305e82c3301"));
        assert!(!is_valid("3f2504e0-4f89-41d3-9a0c-0305e82c330g"));
        assert!(!is_valid("3f2504e04-f89-41d3-9a0c-0305e82c3301"));
    }
}
