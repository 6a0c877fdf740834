use std::time::Duration;

use once_cell::sync::Lazy;

use crate::domains::export::types::ExportLimits;

/// Process-wide configuration snapshot, loaded once on first use and
/// read-only thereafter. Runs still receive limits as explicit values.
pub static ENV_CONFIG: Lazy<ExportConfig> = Lazy::new(ExportConfig::from_env);

pub const DEFAULT_SEARCH_BATCH_TIMEOUT_SECS: u64 = 7200;
pub const DEFAULT_MAX_ENTRIES_EXPORT_LIMIT: u64 = 100_000;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Deployment tunables for the export pipeline.
///
/// Read once at startup; runs receive an immutable [`ExportLimits`] snapshot
/// so behavior is reproducible from the run's inputs alone.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Deadline for each search fetch, in seconds.
    pub search_batch_timeout_secs: u64,
    /// Hard cap on total entries exported by one run.
    pub max_entries_export_limit: u64,
    /// Default page size for search pagination.
    pub page_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            search_batch_timeout_secs: DEFAULT_SEARCH_BATCH_TIMEOUT_SECS,
            max_entries_export_limit: DEFAULT_MAX_ENTRIES_EXPORT_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ExportConfig {
    /// Load configuration from the environment, falling back to deployment
    /// defaults. A `.env` file is honored when present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            search_batch_timeout_secs: parse_var(
                "EXPORT_SEARCH_BATCH_TIMEOUT_SECS",
                defaults.search_batch_timeout_secs,
            ),
            max_entries_export_limit: parse_var(
                "EXPORT_MAX_ENTRIES_LIMIT",
                defaults.max_entries_export_limit,
            ),
            page_size: parse_var("EXPORT_PAGE_SIZE", defaults.page_size),
        }
    }

    /// Immutable per-run limits derived from this configuration.
    pub fn limits(&self) -> ExportLimits {
        ExportLimits {
            search_batch_timeout: Duration::from_secs(self.search_batch_timeout_secs),
            max_entries_export_limit: self.max_entries_export_limit,
        }
    }
}

fn parse_var<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparseable {} value {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let config = ExportConfig::default();
        assert_eq!(config.search_batch_timeout_secs, 7200);
        assert_eq!(config.max_entries_export_limit, 100_000);
        assert_eq!(config.page_size, 1000);

        let limits = config.limits();
        assert_eq!(limits.search_batch_timeout, Duration::from_secs(7200));
        assert_eq!(limits.max_entries_export_limit, 100_000);
    }
}
