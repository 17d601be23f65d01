//! Bucket key canonicalization
//!
//! Maps a request URL onto the key of the server-side throttling bucket it
//! shares with other requests. Resource instances (numeric ids, emoji) are
//! blanked so that e.g. every message in a channel lands in one bucket, while
//! the major parameter (the channel or guild id) stays part of the key.
//!
//! ```text
//! /channels/123/messages/456  ->  channels/123/messages/
//! /users/123                  ->  users/
//! /guilds/9/emojis/😀          ->  guilds/9/emojis/
//! ```

use std::borrow::Cow;

/// Resource collections whose id is a major parameter.
const MAJOR_PARAMETERS: &[&str] = &["channels", "guilds"];

/// Longest name accepted in a `name:id` custom emoji token.
const MAX_CUSTOM_EMOJI_NAME: usize = 32;

/// Canonical bucket key for `url`.
///
/// `api_prefix` is stripped when present (e.g. `https://host/api/v10`), as is
/// any query string. Paths that do not start with the prefix are still
/// canonicalized from their path component.
pub fn bucket_key(url: &str, api_prefix: &str) -> String {
    let path = strip_query(strip_prefix(url, api_prefix));

    let mut segments: Vec<Cow<'_, str>> = path.split('/').map(Cow::Borrowed).collect();
    if segments.first().is_some_and(|s| s.is_empty()) {
        segments.remove(0);
    }

    let start = match segments.first() {
        Some(first) if MAJOR_PARAMETERS.contains(&first.as_ref()) => 2,
        _ => 0,
    };

    // Walk (resource, instance) pairs after the major parameter
    let mut i = start;
    while i < segments.len() {
        let end = (i + 2).min(segments.len());
        for segment in &mut segments[i..end] {
            if is_instance(segment) {
                *segment = Cow::Borrowed("");
            }
        }
        i += 2;
    }

    segments.join("/")
}

fn strip_prefix<'a>(url: &'a str, api_prefix: &str) -> &'a str {
    if !api_prefix.is_empty()
        && let Some(rest) = url.strip_prefix(api_prefix)
    {
        return rest;
    }

    // Absolute URL with an unknown prefix: keep only the path
    match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = &url[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(path_start) => &after_scheme[path_start..],
                None => "",
            }
        }
        None => url,
    }
}

fn strip_query(path: &str) -> &str {
    match path.find(['?', '#']) {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// Whether a path segment names a specific resource instance.
fn is_instance(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    let decoded = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
    is_integer(&decoded) || is_emoji(&decoded) || is_custom_emoji(&decoded)
}

fn is_integer(s: &str) -> bool {
    s.parse::<i64>().is_ok() || s.parse::<u64>().is_ok()
}

/// `name:id`, optionally prefixed with `a:` for animated emoji.
fn is_custom_emoji(s: &str) -> bool {
    let s = s.strip_prefix("a:").unwrap_or(s);
    let Some((name, id)) = s.split_once(':') else {
        return false;
    };

    !name.is_empty()
        && name.len() <= MAX_CUSTOM_EMOJI_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !id.is_empty()
        && id.chars().all(|c| c.is_ascii_digit())
}

/// Whether the segment consists only of emoji (including ZWJ sequences,
/// skin tone modifiers, flags and keycaps).
fn is_emoji(s: &str) -> bool {
    let keycap = s.contains('\u{20E3}');
    let mut pictographic = false;

    for c in s.chars() {
        if is_pictographic(c) {
            pictographic = true;
        } else if is_emoji_component(c) {
            continue;
        } else if keycap && matches!(c, '0'..='9' | '#' | '*') {
            pictographic = true;
        } else {
            return false;
        }
    }

    pictographic
}

fn is_pictographic(c: char) -> bool {
    matches!(
        c as u32,
        0x00A9
            | 0x00AE
            | 0x203C
            | 0x2049
            | 0x2122
            | 0x2139
            | 0x2194..=0x21AA
            | 0x231A..=0x23FF
            | 0x24C2
            | 0x25AA..=0x25FE
            | 0x2600..=0x27BF
            | 0x2934..=0x2935
            | 0x2B05..=0x2B55
            | 0x3030
            | 0x303D
            | 0x3297
            | 0x3299
            | 0x1F000..=0x1FAFF
    )
}

/// Joiners, variation selectors, keycap combiner and tag characters.
fn is_emoji_component(c: char) -> bool {
    matches!(
        c as u32,
        0x200D | 0xFE0E | 0xFE0F | 0x20E3 | 0xE0020..=0xE007F
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://example.com/api/v10";

    #[test]
    fn test_major_parameter_preserved() {
        assert_eq!(
            bucket_key("/channels/123/messages/456", ""),
            "channels/123/messages/"
        );
        assert_eq!(
            bucket_key(&format!("{}/channels/123/messages/456", PREFIX), PREFIX),
            "channels/123/messages/"
        );
    }

    #[test]
    fn test_non_major_resource_generalized() {
        assert_eq!(bucket_key("/users/123", ""), "users/");
        assert_eq!(bucket_key("/users/@me/guilds", ""), "users/@me/guilds");
    }

    #[test]
    fn test_distinct_instances_share_key() {
        let a = bucket_key(&format!("{}/channels/1/messages/10", PREFIX), PREFIX);
        let b = bucket_key(&format!("{}/channels/1/messages/99", PREFIX), PREFIX);
        let other_channel = bucket_key(&format!("{}/channels/2/messages/10", PREFIX), PREFIX);

        assert_eq!(a, b);
        assert_ne!(a, other_channel);
    }

    #[test]
    fn test_emoji_blanked_like_ids() {
        assert_eq!(bucket_key("/guilds/9/emojis/😀", ""), "guilds/9/emojis/");
        assert_eq!(bucket_key("/guilds/9/emojis/42", ""), "guilds/9/emojis/");
    }

    #[test]
    fn test_percent_encoded_emoji() {
        assert_eq!(
            bucket_key("/channels/1/messages/2/reactions/%F0%9F%98%80/@me", ""),
            "channels/1/messages//reactions//@me"
        );
    }

    #[test]
    fn test_custom_emoji_token() {
        assert_eq!(
            bucket_key("/channels/1/messages/2/reactions/party_blob:123456/@me", ""),
            "channels/1/messages//reactions//@me"
        );
        assert!(is_custom_emoji("a:wave:99"));
        assert!(!is_custom_emoji("wave:"));
        assert!(!is_custom_emoji("not-emoji:12"));
    }

    #[test]
    fn test_query_string_stripped() {
        assert_eq!(
            bucket_key(
                &format!("{}/guilds/5/members?limit=100&after=77", PREFIX),
                PREFIX
            ),
            "guilds/5/members"
        );
    }

    #[test]
    fn test_unknown_prefix_uses_path() {
        assert_eq!(
            bucket_key("https://other.host/users/123?x=1", PREFIX),
            "users/"
        );
    }

    #[test]
    fn test_emoji_sequences() {
        assert!(is_emoji("👍🏽"));
        assert!(is_emoji("👨‍👩‍👧"));
        assert!(is_emoji("🇳🇴"));
        assert!(is_emoji("1️⃣"));
        assert!(!is_emoji("1"));
        assert!(!is_emoji("messages"));
        assert!(!is_emoji("\u{FE0F}"));
    }
}
