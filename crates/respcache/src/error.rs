use thiserror::Error;

/// Raised while assembling a [`crate::ResponseCachingLayer`], before any
/// request is served.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("response caching requires a store")]
    MissingStore,
    #[error("response caching requires a caching policy")]
    MissingPolicy,
    #[error("response caching requires a key provider")]
    MissingKeyProvider,
    #[error("invalid response caching option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}
