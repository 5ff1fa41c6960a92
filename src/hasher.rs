//! TB-014: BLAKE3 fingerprints for published schema documents.

/// Fingerprint of the dumped schema documents of one namespace, in
/// document order. Returns `"blake3:{hex}"`.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb014_fingerprint_format() {
        let h = composite_hash(&["tables: {}", "entity_classes: {}"]);
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), "blake3:".len() + 64);
        assert_eq!(h, composite_hash(&["tables: {}", "entity_classes: {}"]));
    }

    #[test]
    fn test_tb014_composite_is_order_sensitive() {
        let ab = composite_hash(&["a", "b"]);
        let ba = composite_hash(&["b", "a"]);
        assert_ne!(ab, ba);
        // separator keeps ["ab", ""] distinct from ["a", "b"]
        assert_ne!(composite_hash(&["ab", ""]), ab);
    }
}
