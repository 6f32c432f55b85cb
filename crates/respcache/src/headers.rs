//! Parsing of the caching-relevant request and response headers.

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING, VARY};
use http::{HeaderMap, HeaderName};
use std::time::{Duration, SystemTime};

/// Parsed `Cache-Control` directives, merged across every header line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub only_if_cached: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub min_fresh: Option<Duration>,
    /// `max-stale` was present, with or without a limit.
    pub max_stale: bool,
    pub max_stale_limit: Option<Duration>,
}

impl CacheControl {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all(http::header::CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                cc.merge(value);
            }
        }
        cc
    }

    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        cc.merge(value);
        cc
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };
            let seconds = || arg.and_then(|a| a.parse::<u64>().ok()).map(Duration::from_secs);

            match name.to_ascii_lowercase().as_str() {
                "public" => self.public = true,
                "private" => self.private = true,
                "no-cache" => self.no_cache = true,
                "no-store" => self.no_store = true,
                "must-revalidate" => self.must_revalidate = true,
                "proxy-revalidate" => self.proxy_revalidate = true,
                "only-if-cached" => self.only_if_cached = true,
                "max-age" => self.max_age = seconds().or(self.max_age),
                "s-maxage" => self.s_maxage = seconds().or(self.s_maxage),
                "min-fresh" => self.min_fresh = seconds().or(self.min_fresh),
                "max-stale" => {
                    self.max_stale = true;
                    self.max_stale_limit = seconds().or(self.max_stale_limit);
                }
                _ => {}
            }
        }
    }
}

pub fn parse_http_date(headers: &HeaderMap, name: &HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// Field names listed by every `Vary` line, in order of appearance.
pub fn vary_header_names(headers: &HeaderMap) -> Vec<String> {
    comma_separated(headers, &VARY)
}

pub fn comma_separated(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}
