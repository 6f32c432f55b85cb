//! Cache key derivation.
//!
//! Base keys look like `GET\x1eHTTP\x1eEXAMPLE.COM:8080/path`. Vary keys append
//! the rule's prefix, then an `H` section with `NAME=value` pairs for each
//! varying header and a `Q` section for each varying query parameter.

use crate::context::ResponseCachingContext;
use crate::entry::CachedVaryByRules;
use http::header::HOST;
use std::collections::BTreeMap;
use url::form_urlencoded;

const KEY_DELIMITER: char = '\x1e';
const KEY_SUB_DELIMITER: &str = "\x1f";

/// Derives the strings under which entries are stored and looked up.
pub trait ResponseCacheKeyProvider: Send + Sync + 'static {
    /// Key for the request ignoring any vary rules. The query string is not part of it.
    fn create_base_key(&self, ctx: &ResponseCachingContext) -> String;

    /// Key for the variant matching this request under the vary rules found at
    /// lookup time, or `None` when no rules were found.
    fn create_lookup_vary_by_key(&self, ctx: &ResponseCachingContext) -> Option<String>;

    /// Key under which a new variant is stored. Same algorithm as lookup so the
    /// two always agree for the same rule.
    fn create_storage_vary_key(&self, ctx: &ResponseCachingContext) -> Option<String>;
}

/// Builds keys from the request method, scheme, authority and path.
///
/// The scheme comes from the request URI only. Servers receive requests in
/// origin form (`/path`), which carries no scheme, so such requests key as
/// `HTTP` even when they arrived over TLS. Deployments that serve one origin
/// over both schemes, or sit behind a TLS terminator, should supply a key
/// provider that reads the scheme from wherever their stack records it.
#[derive(Debug, Clone)]
pub struct DefaultKeyProvider {
    case_sensitive_paths: bool,
}

impl DefaultKeyProvider {
    pub fn new(case_sensitive_paths: bool) -> Self {
        Self {
            case_sensitive_paths,
        }
    }

    fn vary_by_key(&self, ctx: &ResponseCachingContext) -> Option<String> {
        ctx.cached_vary_by_rules()
            .map(|rules| build_vary_key(ctx, rules))
    }
}

impl Default for DefaultKeyProvider {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ResponseCacheKeyProvider for DefaultKeyProvider {
    fn create_base_key(&self, ctx: &ResponseCachingContext) -> String {
        let request = ctx.request();
        let scheme = request.uri.scheme_str().unwrap_or("http");
        let host = request
            .uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| request.headers.get(HOST).and_then(|h| h.to_str().ok()))
            .unwrap_or_default();
        let path = request.uri.path();

        let mut key = String::with_capacity(
            request.method.as_str().len() + scheme.len() + host.len() + path.len() + 2,
        );
        key.push_str(&request.method.as_str().to_ascii_uppercase());
        key.push(KEY_DELIMITER);
        key.push_str(&scheme.to_ascii_uppercase());
        key.push(KEY_DELIMITER);
        key.push_str(&host.to_ascii_uppercase());
        if self.case_sensitive_paths {
            key.push_str(path);
        } else {
            key.push_str(&path.to_uppercase());
        }
        key
    }

    fn create_lookup_vary_by_key(&self, ctx: &ResponseCachingContext) -> Option<String> {
        self.vary_by_key(ctx)
    }

    fn create_storage_vary_key(&self, ctx: &ResponseCachingContext) -> Option<String> {
        self.vary_by_key(ctx)
    }
}

fn build_vary_key(ctx: &ResponseCachingContext, rules: &CachedVaryByRules) -> String {
    let request = ctx.request();
    let mut key = rules.vary_by_key_prefix.clone();

    if !rules.headers.is_empty() {
        key.push(KEY_DELIMITER);
        key.push('H');
        for name in &rules.headers {
            key.push(KEY_DELIMITER);
            key.push_str(name);
            key.push('=');
            let values: Vec<String> = request
                .headers
                .get_all(name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            key.push_str(&values.join(KEY_SUB_DELIMITER));
        }
    }

    if !rules.query_keys.is_empty() {
        key.push(KEY_DELIMITER);
        key.push('Q');
        let query = request.uri.query().unwrap_or_default();
        if rules.query_keys.len() == 1 && rules.query_keys[0] == "*" {
            for (name, values) in all_query_values(query) {
                push_query_pair(&mut key, &name, &values);
            }
        } else {
            for name in &rules.query_keys {
                push_query_pair(&mut key, name, &query_values(query, name));
            }
        }
    }

    key
}

fn push_query_pair(key: &mut String, name: &str, values: &[String]) {
    key.push(KEY_DELIMITER);
    key.push_str(name);
    key.push('=');
    key.push_str(&values.join(KEY_SUB_DELIMITER));
}

/// Values of `name`, compared without regard to case, in request order.
fn query_values(query: &str, name: &str) -> Vec<String> {
    form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k.to_uppercase() == name)
        .map(|(_, v)| v.into_owned())
        .collect()
}

/// Every parameter grouped under its upper-cased name, in ordinal name order.
fn all_query_values(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        grouped.entry(k.to_uppercase()).or_default().push(v.into_owned());
    }
    grouped
}
