//! Conditional request evaluation against a cached entry.

use crate::headers::parse_http_date;
use http::header::{DATE, ETAG, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, LAST_MODIFIED};
use http::HeaderMap;

/// An entity tag as it appears in `ETag` and `If-None-Match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTag<'a> {
    pub weak: bool,
    pub tag: &'a str,
}

impl<'a> EntityTag<'a> {
    /// Strong comparison: both tags strong and opaque values identical.
    pub fn strong_eq(&self, other: &EntityTag<'_>) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }

    pub fn parse(value: &'a str) -> Option<Self> {
        match parse_list(value).as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }
}

/// Parses a comma-separated list of entity tags. Malformed trailing input ends
/// the list. Commas inside quotes are part of the tag.
fn parse_list(value: &str) -> Vec<EntityTag<'_>> {
    let mut tags = Vec::new();
    let mut rest = value;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if rest.is_empty() {
            break;
        }
        let (weak, quoted) = match rest.strip_prefix("W/") {
            Some(after) => (true, after),
            None => (false, rest),
        };
        let Some(inner) = quoted.strip_prefix('"') else {
            break;
        };
        let Some(end) = inner.find('"') else {
            break;
        };
        tags.push(EntityTag {
            weak,
            tag: &inner[..end],
        });
        rest = &inner[end + 1..];
    }
    tags
}

/// Whether the cached entry satisfies the request's conditional headers, in
/// which case a `304 Not Modified` is sent instead of the body.
///
/// `If-None-Match` wins whenever present. Otherwise `If-Unmodified-Since` is
/// satisfied when the entry's `Last-Modified` (or `Date`) is not later.
pub fn content_is_not_modified(cached: &HeaderMap, request: &HeaderMap) -> bool {
    let if_none_match: Vec<&str> = request
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if !if_none_match.is_empty() {
        if if_none_match.iter().any(|v| v.trim() == "*") {
            tracing::debug!("not modified: If-None-Match wildcard");
            return true;
        }
        let Some(etag) = cached
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(EntityTag::parse)
        else {
            return false;
        };
        let matched = if_none_match
            .iter()
            .copied()
            .flat_map(parse_list)
            .any(|candidate| candidate.strong_eq(&etag));
        if matched {
            tracing::debug!(etag = etag.tag, "not modified: If-None-Match matched");
        }
        return matched;
    }

    if let Some(since) = parse_http_date(request, &IF_UNMODIFIED_SINCE) {
        let modified =
            parse_http_date(cached, &LAST_MODIFIED).or_else(|| parse_http_date(cached, &DATE));
        if modified.is_some_and(|m| m <= since) {
            tracing::debug!("not modified: If-Unmodified-Since satisfied");
            return true;
        }
    }

    false
}
