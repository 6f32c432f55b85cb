//! Canonical form for vary-by name lists.

/// Response extension through which a handler lists the query keys its
/// response varies by. `"*"` varies by every query key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaryByQueryKeys(pub Vec<String>);

impl VaryByQueryKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }
}

/// Upper-case every name and, when there is more than one, sort ordinally so
/// that equal sets compare equal as sequences.
pub fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = names
        .into_iter()
        .map(|name| name.as_ref().to_uppercase())
        .collect();
    if normalized.len() > 1 {
        normalized.sort_unstable();
    }
    normalized
}
