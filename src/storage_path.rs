//! Reverse blob references back to bucket-relative storage paths.
//!
//! The object store deletes by path, while rows keep the URL handed out at
//! upload time (signed or public). Matchers are tried from the strictest
//! shape to the most permissive one and the first hit wins.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use regex_lite::{Regex, escape};

/// A matcher receives the reference without query/fragment and the bucket
/// name, and returns the raw (still encoded) path when it recognizes the
/// shape.
type Matcher = fn(&str, &str) -> Option<String>;

const MATCHERS: [Matcher; 3] = [signed_object, public_object, bucket_relative];

/// Resolve `reference` to a path inside `bucket`.
///
/// Returns [`None`] when no shape matches, which callers treat as "nothing
/// to delete".
pub fn path_from_url(reference: &str, bucket: &str) -> Option<String> {
    let location = strip_query(reference.trim());
    if location.is_empty() || bucket.is_empty() {
        return None;
    }

    MATCHERS
        .iter()
        .find_map(|matcher| matcher(location, bucket))
        .and_then(|path| decode(&path))
}

/// `/storage/<anything>/sign/{bucket}/{path}`.
fn signed_object(location: &str, bucket: &str) -> Option<String> {
    capture(
        &format!(r"/storage/(?:[^/]+/)*?sign/{}/(.+)$", escape(bucket)),
        location,
    )
}

/// `/storage/<anything>/public/{bucket}/{path}`.
fn public_object(location: &str, bucket: &str) -> Option<String> {
    capture(
        &format!(r"/storage/(?:[^/]+/)*?public/{}/(.+)$", escape(bucket)),
        location,
    )
}

/// `{bucket}/{path}` anywhere, starting on a segment boundary.
fn bucket_relative(location: &str, bucket: &str) -> Option<String> {
    capture(&format!(r"(?:^|/){}/(.+)$", escape(bucket)), location)
}

fn capture(pattern: &str, haystack: &str) -> Option<String> {
    let regex = Regex::new(pattern).ok()?;
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

fn strip_query(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

fn decode(path: &str) -> Option<String> {
    let decoded = match percent_decode_str(path).decode_utf8() {
        Ok(Cow::Borrowed(path)) => path.to_owned(),
        Ok(Cow::Owned(path)) => path,
        // Invalid UTF-8 once decoded, keep the path as stored.
        Err(_) => path.to_owned(),
    };

    (!decoded.is_empty()).then_some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "https://xyzcompany.supabase.co";

    #[test]
    fn test_signed_url_strips_token() {
        let url = format!(
            "{HOST}/storage/v1/object/sign/avatars/U1/123_a.png?token=xyz"
        );
        assert_eq!(
            path_from_url(&url, "avatars").as_deref(),
            Some("U1/123_a.png")
        );
    }

    #[test]
    fn test_public_url() {
        let url = format!("{HOST}/storage/v1/object/public/posts/U1/2_b.png");
        assert_eq!(path_from_url(&url, "posts").as_deref(), Some("U1/2_b.png"));
    }

    #[test]
    fn test_bare_bucket_fallback() {
        let url =
            format!("{HOST}/storage/v1/object/authenticated/posts/U1/3.jpg");
        assert_eq!(path_from_url(&url, "posts").as_deref(), Some("U1/3.jpg"));
        assert_eq!(
            path_from_url("posts/U9/cat.png", "posts").as_deref(),
            Some("U9/cat.png")
        );
    }

    #[test]
    fn test_percent_decoding() {
        let url = format!(
            "{HOST}/storage/v1/object/sign/avatars/U1/my%20photo%C3%A9.png?token=1"
        );
        assert_eq!(
            path_from_url(&url, "avatars").as_deref(),
            Some("U1/my photoé.png")
        );
    }

    #[test]
    fn test_wrong_bucket_or_garbage() {
        let url = format!("{HOST}/storage/v1/object/sign/avatars/U1/a.png");
        assert_eq!(path_from_url(&url, "posts"), None);
        assert_eq!(path_from_url("", "posts"), None);
        assert_eq!(path_from_url("not a url at all", "posts"), None);
        // Bucket name must sit on a segment boundary.
        assert_eq!(path_from_url("https://cdn.test/myposts/a.png", "posts"), None);
        // Nothing after the bucket.
        assert_eq!(
            path_from_url(&format!("{HOST}/storage/v1/object/public/posts/"), "posts"),
            None
        );
    }

    #[test]
    fn test_first_occurrence_wins() {
        let url = format!(
            "{HOST}/storage/v1/object/sign/posts/sign/posts/a.png?token=t"
        );
        assert_eq!(
            path_from_url(&url, "posts").as_deref(),
            Some("sign/posts/a.png")
        );
    }

    #[test]
    fn test_bucket_is_not_a_pattern() {
        let url = format!("{HOST}/storage/v1/object/public/a.b/x.png");
        assert_eq!(path_from_url(&url, "a.b").as_deref(), Some("x.png"));
        let url = format!("{HOST}/storage/v1/object/public/axb/x.png");
        assert_eq!(path_from_url(&url, "a.b"), None);
    }

    #[test]
    fn test_pure() {
        let url = format!("{HOST}/storage/v1/object/sign/posts/U1/1_a.png?token=1");
        let first = path_from_url(&url, "posts");
        assert_eq!(first, path_from_url(&url, "posts"));
        assert_eq!(first.as_deref(), Some("U1/1_a.png"));
    }
}
