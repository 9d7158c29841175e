//! Cache sizing.

use std::num::NonZeroUsize;

const DEFAULT_FRAGMENT_LIMIT: usize = 1000;
const DEFAULT_TEMPLATE_LIMIT: usize = 64;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache rendered fragments at all.
    pub enable_fragments: bool,
    /// Maximum rendered fragments kept in the LRU.
    pub fragment_limit: usize,
    /// Maximum compiled templates kept in the LRU.
    pub template_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_fragments: true,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            template_limit: DEFAULT_TEMPLATE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enable_fragments: settings.enable_fragments,
            fragment_limit: settings.fragment_limit,
            template_limit: settings.template_limit,
        }
    }
}

impl CacheConfig {
    /// Fragment limit for the LRU, clamped to at least one entry.
    pub fn fragment_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.fragment_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn template_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.template_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_clamp_to_one() {
        let config = CacheConfig {
            enable_fragments: true,
            fragment_limit: 0,
            template_limit: 0,
        };
        assert_eq!(config.fragment_limit_non_zero().get(), 1);
        assert_eq!(config.template_limit_non_zero().get(), 1);
    }
}
