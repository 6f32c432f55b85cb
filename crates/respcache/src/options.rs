use crate::error::BuildError;
use std::time::Duration;

const DEFAULT_MAXIMUM_BODY_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_BODY_SPLIT_THRESHOLD: usize = 80 * 1024;
const DEFAULT_EXPIRATION: Duration = Duration::from_secs(10);

/// Tunables for the response caching middleware.
#[derive(Debug, Clone)]
pub struct ResponseCachingOptions {
    /// Largest body that will be captured; bigger responses are never cached.
    pub maximum_body_size: usize,
    /// Bodies at least this large are stored apart from their metadata.
    pub body_split_threshold: usize,
    /// Lifetime used when a cacheable response carries no freshness information.
    pub default_expiration: Duration,
    /// Whether two paths differing only in case are distinct cache entries.
    pub case_sensitive_paths: bool,
}

impl Default for ResponseCachingOptions {
    fn default() -> Self {
        Self {
            maximum_body_size: DEFAULT_MAXIMUM_BODY_SIZE,
            body_split_threshold: DEFAULT_BODY_SPLIT_THRESHOLD,
            default_expiration: DEFAULT_EXPIRATION,
            case_sensitive_paths: true,
        }
    }
}

impl ResponseCachingOptions {
    pub fn maximum_body_size(mut self, bytes: usize) -> Self {
        self.maximum_body_size = bytes;
        self
    }

    pub fn body_split_threshold(mut self, bytes: usize) -> Self {
        self.body_split_threshold = bytes;
        self
    }

    pub fn default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = expiration;
        self
    }

    pub fn case_sensitive_paths(mut self, enabled: bool) -> Self {
        self.case_sensitive_paths = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.maximum_body_size == 0 {
            return Err(BuildError::InvalidOption {
                name: "maximum_body_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.body_split_threshold == 0 {
            return Err(BuildError::InvalidOption {
                name: "body_split_threshold",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ResponseCachingOptions::default();
        assert_eq!(options.default_expiration, Duration::from_secs(10));
        assert_eq!(options.maximum_body_size, 64 * 1024 * 1024);
        assert!(options.case_sensitive_paths);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_sizes_rejected() {
        let err = ResponseCachingOptions::default()
            .maximum_body_size(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("maximum_body_size"));

        let err = ResponseCachingOptions::default()
            .body_split_threshold(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidOption { name: "body_split_threshold", .. }));
    }
}
