use std::num::NonZeroUsize;

use crate::storage::DEFAULT_SERVICE_NAME;

const DEFAULT_ACCOUNT_SCOPE: &str = "remoteops";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Scope handed to the session factory when sessions are persisted.
    pub account_scope: String,
    /// `None` keeps every unclaimed result until it is claimed.
    pub result_buffer_capacity: Option<NonZeroUsize>,
    pub keyring_service: String,
    pub log_filter: String,
    /// When set, credentials live in memory instead of the OS keyring.
    pub password: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            account_scope: DEFAULT_ACCOUNT_SCOPE.to_string(),
            result_buffer_capacity: None,
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            password: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            account_scope: read_string(&lookup, "REMOTEOPS_ACCOUNT_SCOPE")
                .unwrap_or(defaults.account_scope),
            result_buffer_capacity: read_usize(&lookup, "REMOTEOPS_RESULT_BUFFER_CAPACITY")
                .and_then(NonZeroUsize::new),
            keyring_service: read_string(&lookup, "REMOTEOPS_KEYRING_SERVICE")
                .unwrap_or(defaults.keyring_service),
            log_filter: read_string(&lookup, "REMOTEOPS_LOG").unwrap_or(defaults.log_filter),
            password: lookup("REMOTEOPS_PASSWORD").filter(|value| !value.is_empty()),
        }
    }
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_usize(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<usize> {
    lookup(name).and_then(|value| value.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServiceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(config(&[]), ServiceConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("REMOTEOPS_ACCOUNT_SCOPE", "nextcloud"),
            ("REMOTEOPS_RESULT_BUFFER_CAPACITY", "64"),
            ("REMOTEOPS_LOG", "debug"),
            ("REMOTEOPS_PASSWORD", "app-password"),
        ]);
        assert_eq!(config.account_scope, "nextcloud");
        assert_eq!(config.result_buffer_capacity, NonZeroUsize::new(64));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.password.as_deref(), Some("app-password"));
    }

    #[test]
    fn zero_or_garbage_capacity_means_unbounded() {
        assert_eq!(
            config(&[("REMOTEOPS_RESULT_BUFFER_CAPACITY", "0")]).result_buffer_capacity,
            None
        );
        assert_eq!(
            config(&[("REMOTEOPS_RESULT_BUFFER_CAPACITY", "lots")]).result_buffer_capacity,
            None
        );
    }
}
