use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::BackendKind;
use crate::error::ConfigError;
use crate::freshness::{DataType, FreshnessPolicy};
use crate::session::MarketCalendar;
use crate::ProviderId;

/// Runtime configuration, validated once before the orchestrator is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Maximum cache age in hours, keyed by data type name.
    pub cache_hours: BTreeMap<String, f64>,
    /// Providers in the order they are tried.
    pub provider_priority: Vec<String>,
    /// Per-tier selection counts. Carried for consumers; unused by the core.
    pub tier_counts: BTreeMap<String, u32>,
    pub concurrency: ConcurrencyConfig,
    pub market: MarketCalendar,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_hours: BTreeMap::from([
                (DataType::PriceDaily.as_str().to_owned(), 5.0),
                (DataType::PriceWeekly.as_str().to_owned(), 24.0),
                (DataType::Fundamentals.as_str().to_owned(), 24.0),
                (DataType::Metadata.as_str().to_owned(), 24.0),
            ]),
            provider_priority: ProviderId::ALL
                .iter()
                .map(|provider| provider.as_str().to_owned())
                .collect(),
            tier_counts: BTreeMap::new(),
            concurrency: ConcurrencyConfig::default(),
            market: MarketCalendar::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Simultaneous in-flight provider calls across a batch.
    pub provider_calls: usize,
    /// Tickers resolved concurrently; bounds cache reads.
    pub tickers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            provider_calls: 4,
            tickers: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub primary: BackendKind,
    /// Overrides `<home>/cache/tickstash.duckdb`.
    pub local_path: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            primary: BackendKind::Local,
            local_path: None,
            remote: None,
        }
    }
}

/// PostgREST-style remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    /// Usually supplied through `TICKSTASH_REMOTE_KEY` rather than the file.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_remote_timeout_ms() -> u64 {
    5_000
}

/// Secrets read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub alphavantage_api_key: Option<String>,
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            alphavantage_api_key: read("TICKSTASH_ALPHAVANTAGE_API_KEY")
                .or_else(|| read("ALPHAVANTAGE_API_KEY")),
            remote_url: read("TICKSTASH_REMOTE_URL"),
            remote_key: read("TICKSTASH_REMOTE_KEY"),
        }
    }
}

impl AppConfig {
    /// Checks every section; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.freshness_policy()?;
        self.providers()?;

        if self.concurrency.provider_calls == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "concurrency.provider_calls",
            });
        }
        if self.concurrency.tickers == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "concurrency.tickers",
            });
        }

        if let Some(remote) = &self.cache.remote {
            let url = remote.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidRemote(format!(
                    "url '{url}' must start with http:// or https://"
                )));
            }
        }
        if self.cache.primary == BackendKind::Remote && self.cache.remote.is_none() {
            return Err(ConfigError::InvalidRemote(String::from(
                "primary backend is remote but no remote section is configured",
            )));
        }
        Ok(())
    }

    pub fn freshness_policy(&self) -> Result<FreshnessPolicy, ConfigError> {
        self.cache_hours
            .iter()
            .try_fold(FreshnessPolicy::default(), |policy, (name, hours)| {
                policy.with_hours(DataType::from_str(name)?, *hours)
            })
    }

    /// Provider priority as ids; rejects unknown names, duplicates and an empty list.
    pub fn providers(&self) -> Result<Vec<ProviderId>, ConfigError> {
        if self.provider_priority.is_empty() {
            return Err(ConfigError::EmptyProviderPriority);
        }

        let mut seen = BTreeSet::new();
        self.provider_priority
            .iter()
            .map(|name| {
                let provider = ProviderId::from_str(name)?;
                if !seen.insert(provider) {
                    return Err(ConfigError::DuplicateProvider {
                        provider: provider.as_str().to_owned(),
                    });
                }
                Ok(provider)
            })
            .collect()
    }

    /// Fills the remote section from credentials when the file leaves it out.
    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        match (&mut self.cache.remote, &credentials.remote_url) {
            (Some(remote), _) => {
                if remote.api_key.is_none() {
                    remote.api_key = credentials.remote_key.clone();
                }
            }
            (None, Some(url)) => {
                self.cache.remote = Some(RemoteConfig {
                    url: url.clone(),
                    api_key: credentials.remote_key.clone(),
                    timeout_ms: default_remote_timeout_ms(),
                });
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();

        assert_eq!(config.validate(), Ok(()));
        assert_eq!(
            config.providers(),
            Ok(vec![ProviderId::Yahoo, ProviderId::Alphavantage])
        );
    }

    #[test]
    fn unknown_cache_key_is_a_config_error() {
        let mut config = AppConfig::default();
        config.cache_hours.insert(String::from("intraday"), 1.0);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDataType { .. })
        ));
    }

    #[test]
    fn negative_hours_are_rejected() {
        let mut config = AppConfig::default();
        config.cache_hours.insert(String::from("fundamentals"), -2.0);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveDuration { .. })
        ));
    }

    #[test]
    fn duplicate_providers_are_rejected() {
        let config = AppConfig {
            provider_priority: vec![String::from("yahoo"), String::from("yahoo")],
            ..AppConfig::default()
        };

        assert_eq!(
            config.providers(),
            Err(ConfigError::DuplicateProvider {
                provider: String::from("yahoo")
            })
        );
    }

    #[test]
    fn empty_priority_is_rejected() {
        let config = AppConfig {
            provider_priority: Vec::new(),
            ..AppConfig::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::EmptyProviderPriority));
    }

    #[test]
    fn zero_provider_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.concurrency.provider_calls = 0;

        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                field: "concurrency.provider_calls"
            })
        );
    }

    #[test]
    fn credentials_prefer_the_prefixed_variable() {
        let credentials = Credentials::from_lookup(|name| match name {
            "TICKSTASH_ALPHAVANTAGE_API_KEY" => Some(String::from("primary")),
            "ALPHAVANTAGE_API_KEY" => Some(String::from("fallback")),
            "TICKSTASH_REMOTE_URL" => Some(String::from("   ")),
            _ => None,
        });

        assert_eq!(credentials.alphavantage_api_key.as_deref(), Some("primary"));
        assert_eq!(credentials.remote_url, None);
    }

    #[test]
    fn remote_section_is_built_from_credentials() {
        let mut config = AppConfig::default();
        config.apply_credentials(&Credentials {
            alphavantage_api_key: None,
            remote_url: Some(String::from("https://cache.example.test")),
            remote_key: Some(String::from("service-key")),
        });

        let remote = config.cache.remote.expect("remote configured");
        assert_eq!(remote.url, "https://cache.example.test");
        assert_eq!(remote.api_key.as_deref(), Some("service-key"));
    }

    #[test]
    fn market_calendar_is_read_by_zone_name() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "market": {"timezone": "Europe/Oslo", "open": "09:00", "close": "16:20"}
        }))
        .expect("config");

        let expected = MarketCalendar::try_from(crate::session::CalendarSettings {
            timezone: String::from("Europe/Oslo"),
            open: String::from("09:00"),
            close: String::from("16:20"),
        })
        .expect("calendar");
        assert_eq!(config.market, expected);
    }
}
