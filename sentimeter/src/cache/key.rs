//! Content fingerprints for the analysis cache.

use sha2::{Digest, Sha256};

/// Namespace every analysis cache key lives in.
pub const ANALYSIS_NAMESPACE: &str = "analysis:";

/// Canonical form of a text for cache lookups.
///
/// Trims, collapses whitespace runs to a single space and maps typographic quotes to
/// their straight ASCII equivalents.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.extend(word.chars().map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            other => other,
        }));
    }
    normalized
}

/// Cache key for a text/model pair: `analysis:` followed by the hex SHA-256 of
/// `normalized_text|model`.
pub fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    format!("{ANALYSIS_NAMESPACE}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  hello \t\n  world  "), "hello world");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_normalize_straightens_quotes() {
        assert_eq!(normalize_text("\u{201C}great\u{201D} isn\u{2019}t it"), "\"great\" isn't it");
    }

    #[test]
    fn test_key_shape() {
        let key = cache_key("hello", "gpt-4o-mini");
        assert!(key.starts_with(ANALYSIS_NAMESPACE));
        let hex = &key[ANALYSIS_NAMESPACE.len()..];
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_equivalent_texts_share_a_key() {
        assert_eq!(
            cache_key("I love  this ", "gpt-4o-mini"),
            cache_key("I love this", "gpt-4o-mini")
        );
        assert_eq!(
            cache_key("it\u{2019}s fine", "gpt-4o-mini"),
            cache_key("it's fine", "gpt-4o-mini")
        );
    }

    #[test]
    fn test_key_depends_on_model_and_text() {
        assert_ne!(cache_key("hello", "gpt-4o-mini"), cache_key("hello", "gpt-4o"));
        assert_ne!(cache_key("hello", "gpt-4o-mini"), cache_key("hello!", "gpt-4o-mini"));
        // Case is significant
        assert_ne!(cache_key("Hello", "gpt-4o-mini"), cache_key("hello", "gpt-4o-mini"));
    }

    #[test]
    fn test_known_digest() {
        // sha256("hello|m")
        let expected = hex::encode(Sha256::digest(b"hello|m"));
        assert_eq!(cache_key("hello", "m"), format!("analysis:{expected}"));
    }
}
