//! Text helpers shared by the content engines
//!
//! Slugs, timeframe strings (`"7d"`, `"2w"`), SEO snippets and referral codes.

use sha2::{Digest, Sha256};

/// Default number of days when a timeframe string cannot be parsed
pub const DEFAULT_TIMEFRAME_DAYS: u32 = 30;

/// Maximum characters of content used in a meta description
pub const META_DESCRIPTION_CHARS: usize = 150;

/// Maximum characters of content used in an excerpt
pub const EXCERPT_CHARS: usize = 200;

/// Build a URL slug from free text
///
/// Lowercases the input, collapses every run of characters outside
/// `[a-z0-9]` into a single `-`, and trims leading/trailing dashes.
/// Uniqueness is not enforced; two titles can share a slug.
///
/// # Examples
///
/// ```
/// use empire_common::text::create_slug;
///
/// assert_eq!(create_slug("Hello World!"), "hello-world");
/// ```
pub fn create_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Parse a timeframe such as `"7d"`, `"2w"`, `"1m"` or `"1y"` into days
///
/// The first `<digits><unit>` occurrence wins. Units: `d` = 1, `w` = 7,
/// `m` = 30, `y` = 365. Anything else yields [`DEFAULT_TIMEFRAME_DAYS`].
pub fn parse_timeframe(timeframe: &str) -> u32 {
    let bytes = timeframe.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }

        let multiplier = match bytes.get(i) {
            Some(b'd') => 1,
            Some(b'w') => 7,
            Some(b'm') => 30,
            Some(b'y') => 365,
            _ => continue,
        };

        return match timeframe[start..i].parse::<u32>() {
            Ok(value) => value.saturating_mul(multiplier),
            Err(_) => DEFAULT_TIMEFRAME_DAYS,
        };
    }

    DEFAULT_TIMEFRAME_DAYS
}

/// First `max_chars` characters of `content` with newlines flattened to spaces
fn flatten_prefix(content: &str, max_chars: usize) -> String {
    content
        .chars()
        .take(max_chars)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

/// SEO meta description: `"{title} - {first 150 chars of content}..."`
pub fn meta_description(title: &str, content: &str) -> String {
    format!(
        "{} - {}...",
        title,
        flatten_prefix(content, META_DESCRIPTION_CHARS)
    )
}

/// Listing excerpt: first 200 chars of content followed by `"..."`
pub fn excerpt(content: &str) -> String {
    format!("{}...", flatten_prefix(content, EXCERPT_CHARS))
}

/// Eight-character uppercase referral code
///
/// `salt` keeps codes distinct when the same user rejoins the same scope.
pub fn referral_code(user_id: &str, scope_id: i64, salt: &str) -> String {
    let digest = Sha256::digest(format!("{}-{}-{}", user_id, scope_id, salt).as_bytes());
    hex::encode(digest)[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_basic() {
        assert_eq!(create_slug("Hello World!"), "hello-world");
    }

    #[test]
    fn test_slug_collapses_and_trims() {
        assert_eq!(create_slug("  --Rust & Tokio: 2024 Guide--  "), "rust-tokio-2024-guide");
        assert_eq!(create_slug("!!!"), "");
        assert_eq!(create_slug("Café au lait"), "caf-au-lait");
    }

    #[test]
    fn test_slug_is_deterministic() {
        assert_eq!(create_slug("Same Title"), create_slug("Same Title"));
    }

    #[test]
    fn test_parse_timeframe_units() {
        assert_eq!(parse_timeframe("7d"), 7);
        assert_eq!(parse_timeframe("2w"), 14);
        assert_eq!(parse_timeframe("1m"), 30);
        assert_eq!(parse_timeframe("1y"), 365);
    }

    #[test]
    fn test_parse_timeframe_defaults() {
        assert_eq!(parse_timeframe("7x"), 30);
        assert_eq!(parse_timeframe(""), 30);
        assert_eq!(parse_timeframe("week"), 30);
        assert_eq!(parse_timeframe("99999999999d"), 30);
    }

    #[test]
    fn test_parse_timeframe_first_match_wins() {
        assert_eq!(parse_timeframe("last 3w"), 21);
        assert_eq!(parse_timeframe("12x3d"), 3);
    }

    #[test]
    fn test_meta_description_truncates_and_flattens() {
        let content = format!("line one\nline two {}", "x".repeat(300));
        let meta = meta_description("Title", &content);

        assert!(meta.starts_with("Title - line one line two "));
        assert!(meta.ends_with("..."));
        assert_eq!(meta.chars().count(), "Title - ".len() + META_DESCRIPTION_CHARS + 3);
    }

    #[test]
    fn test_excerpt_multibyte_safe() {
        let content = "é".repeat(250);
        let ex = excerpt(&content);
        assert_eq!(ex.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_referral_code_shape() {
        let code = referral_code("user-1", 42, "salt");
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(code, referral_code("user-1", 42, "other"));
    }
}
