//! Hashing System - SHA-256 cache keys
//!
//! Keys are pure functions of their inputs so concurrent writers of the same
//! entry always agree.

use sha2::{Digest, Sha256};

pub const RENDER_KEY_PREFIX: &str = "svgcache_";
pub const PNG_KEY_PREFIX: &str = "svg2png_";

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Render cache key.
///
/// Template names are sorted and de-duplicated first, so call-site order
/// and repeats do not matter.
pub fn render_cache_key(
    templates: &[String],
    style_id: u32,
    style_last_modified: i64,
    language_id: u32,
    modifier: &str,
) -> String {
    let mut templates: Vec<&str> = templates.iter().map(String::as_str).collect();
    templates.sort_unstable();
    templates.dedup();

    let combined = format!(
        "templates={}&style={}&modified={}&language={}{}",
        templates.join(","),
        style_id,
        style_last_modified,
        language_id,
        modifier
    );
    format!("{}{}", RENDER_KEY_PREFIX, sha256_hex(combined.as_bytes()))
}

/// Converted PNG key, addressed by SVG content.
pub fn png_cache_key(svg: &[u8]) -> String {
    format!("{}{}", PNG_KEY_PREFIX, sha256_hex(svg))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        assert_eq!(sha256_hex(data), sha256_hex(data));
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_render_key_ignores_order_and_duplicates() {
        let a = render_cache_key(&names(&["public:b.svg", "public:a.svg"]), 1, 100, 1, "");
        let b = render_cache_key(
            &names(&["public:a.svg", "public:b.svg", "public:a.svg"]),
            1,
            100,
            1,
            "",
        );
        assert_eq!(a, b);
        assert!(a.starts_with(RENDER_KEY_PREFIX));
    }

    #[test]
    fn test_render_key_varies_with_state() {
        let t = names(&["public:a.svg"]);
        let base = render_cache_key(&t, 1, 100, 1, "");
        assert_ne!(base, render_cache_key(&t, 2, 100, 1, ""));
        assert_ne!(base, render_cache_key(&t, 1, 101, 1, ""));
        assert_ne!(base, render_cache_key(&t, 1, 100, 2, ""));
        assert_ne!(base, render_cache_key(&t, 1, 100, 1, "v2"));
    }

    #[test]
    fn test_png_key_is_content_addressed() {
        assert_eq!(png_cache_key(b"<svg/>"), png_cache_key(b"<svg/>"));
        assert_ne!(png_cache_key(b"<svg/>"), png_cache_key(b"<svg />"));
    }
}
