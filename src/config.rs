//! Configuration management

use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ledger::Account;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Payment gate configuration
    pub payment: PaymentConfig,
    /// Ledger endpoints, keyed by ledger id
    pub ledgers: HashMap<String, LedgerConfig>,
    /// Treasury configuration
    pub treasury: TreasuryConfig,
    /// Usage beacon configuration
    pub beacon: BeaconConfig,
    /// Static resources served through `resources/list` and `resources/read`
    pub resources: Vec<ResourceConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_TOLLGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files must be in the process environment before expansion
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.treasury.resolve_owner().is_empty() {
            return Err(Error::Config("treasury.owner must be set".to_string()));
        }

        if let Some(issuer) = &self.auth.issuer {
            url::Url::parse(issuer)
                .map_err(|e| Error::Config(format!("auth.issuer is not a URL: {e}")))?;
        } else if self.auth.enabled {
            tracing::warn!("auth.issuer not set, bearer tokens will always be rejected");
        }

        if self.payment.enabled {
            if !self.ledgers.contains_key(&self.payment.ledger) {
                return Err(Error::Config(format!(
                    "payment.ledger '{}' has no entry under ledgers",
                    self.payment.ledger
                )));
            }
            self.treasury
                .account
                .check()
                .map_err(|e| Error::Config(format!("treasury.account: {e}")))?;
            if self.payment.allowance_url.is_empty() {
                return Err(Error::Config(
                    "payment.allowance_url must be set when payment is enabled".to_string(),
                ));
            }
        }

        if self.beacon.enabled {
            if self.beacon.tracker_url.is_none() {
                return Err(Error::Config(
                    "beacon.tracker_url must be set when the beacon is enabled".to_string(),
                ));
            }
            if self.beacon.interval.is_zero() {
                return Err(Error::Config("beacon.interval must be positive".to_string()));
            }
        }

        Ok(())
    }

    /// Push `env_files` into the process environment, in order; missing files are skipped
    fn load_env_files(&self) {
        for file in &self.env_files {
            let path = home_relative(file);
            if !path.exists() {
                tracing::debug!(path = %path.display(), "env file absent");
                continue;
            }
            if let Err(e) = dotenvy::from_path(&path) {
                tracing::warn!(path = %path.display(), error = %e, "env file unreadable");
            } else {
                tracing::info!(path = %path.display(), "env file loaded");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL-ish config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Some(url) = self.server.public_url.as_mut() {
            *url = Self::expand_string(&re, url);
        }
        if let Some(issuer) = self.auth.issuer.as_mut() {
            *issuer = Self::expand_string(&re, issuer);
        }
        if let Some(uri) = self.auth.jwks_uri.as_mut() {
            *uri = Self::expand_string(&re, uri);
        }
        self.payment.allowance_url = Self::expand_string(&re, &self.payment.allowance_url);
        for ledger in self.ledgers.values_mut() {
            ledger.url = Self::expand_string(&re, &ledger.url);
        }
        if let Some(url) = self.beacon.tracker_url.as_mut() {
            *url = Self::expand_string(&re, url);
        }
        self.beacon.server_id = Self::expand_string(&re, &self.beacon.server_id);

        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// `~/x` against the home directory, anything else as is
fn home_relative(file: &str) -> PathBuf {
    match (file.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(file),
    }
}

/// Resolve `env:VAR_NAME` indirection, falling back to the literal value
fn resolve_env_ref(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible origin (e.g. `https://tools.example.com`).
    /// When unset, the origin is taken from `X-Forwarded-Proto` and `Host`.
    pub public_url: Option<String>,
    /// Server name reported by `initialize`
    pub name: String,
    /// Instructions reported by `initialize`
    pub instructions: Option<String>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4943,
            public_url: None,
            name: "mcp-tollgate".to_string(),
            instructions: None,
            request_timeout: Duration::from_secs(60),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication. When disabled every caller is anonymous.
    pub enabled: bool,
    /// Trusted token issuer (authorization server base URL)
    pub issuer: Option<String>,
    /// Explicit JWKS URI. Skips metadata discovery when set.
    pub jwks_uri: Option<String>,
    /// Scopes every bearer token must carry
    pub required_scopes: Vec<String>,
    /// Additional scopes per tool name; missing ones yield 403
    pub tool_scopes: HashMap<String, Vec<String>>,
    /// How long a fetched key set stays fresh
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Timeout for discovery and JWKS fetches
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Clock skew tolerance for `exp` (seconds). Zero by default, so a
    /// token is accepted only while its `exp` is in the future.
    pub leeway_secs: u64,
    /// Only fetch discovery documents and key sets over HTTPS
    pub require_https: bool,
    /// Pre-provisioned API keys
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: None,
            jwks_uri: None,
            required_scopes: vec!["openid".to_string()],
            tool_scopes: HashMap::new(),
            jwks_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
            leeway_secs: 0,
            require_https: true,
            api_keys: Vec::new(),
        }
    }
}

/// Pre-provisioned API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Plaintext key (supports `env:VAR_NAME`). Prefer `hash`.
    #[serde(default)]
    pub key: Option<String>,
    /// SHA-256 hex digest of the key, as printed by `mcp-tollgate hash-key`
    #[serde(default)]
    pub hash: Option<String>,
    /// Human-readable label
    #[serde(default)]
    pub label: String,
    /// Principal the key authenticates as
    pub principal: String,
    /// Scopes granted to the key
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ApiKeyConfig {
    /// Resolve the plaintext key (expand env vars)
    #[must_use]
    pub fn resolve_key(&self) -> Option<String> {
        self.key.as_deref().map(resolve_env_ref)
    }
}

/// Payment gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Charge for priced tools
    pub enabled: bool,
    /// Ledger id (key into `ledgers`) used for tool payments
    pub ledger: String,
    /// Page where callers manage their allowances
    pub allowance_url: String,
    /// Price per call, keyed by tool name. Tools not listed are free.
    pub prices: HashMap<String, u64>,
    /// Timeout for a single ledger call
    #[serde(with = "humantime_serde")]
    pub ledger_timeout: Duration,
    /// Delay before the single retry of a transient ledger failure
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ledger: "icp".to_string(),
            allowance_url: String::new(),
            prices: HashMap::new(),
            ledger_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Ledger endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the ledger's JSON interface
    pub url: String,
}

/// Treasury configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    /// Initial owner principal (supports `env:VAR_NAME`)
    pub owner: String,
    /// Ledger account that receives payments
    pub account: Account,
}

impl TreasuryConfig {
    /// Resolve the owner principal (expand env vars)
    #[must_use]
    pub fn resolve_owner(&self) -> String {
        resolve_env_ref(&self.owner)
    }
}

/// Usage beacon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Report usage to the tracker
    pub enabled: bool,
    /// Tracker base URL
    pub tracker_url: Option<String>,
    /// Reporting interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Identifier this service reports under
    pub server_id: String,
    /// Code hash override. Defaults to the SHA-256 of the running executable.
    pub code_hash: Option<String>,
    /// Timeout for a single report
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tracker_url: None,
            interval: Duration::from_secs(60),
            server_id: "mcp-tollgate".to_string(),
            code_hash: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Static text resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource URI
    pub uri: String,
    /// Resource name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// MIME type
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Text content
    pub text: String,
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s": "100ms" also ends in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            treasury: TreasuryConfig {
                owner: "owner-principal".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "MCP_TOLLGATE_TEST_KEY_A=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(
            env::var("MCP_TOLLGATE_TEST_KEY_A").unwrap(),
            "hello_from_env_file"
        );
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_full_config_from_yaml() {
        let yaml = r#"
server:
  port: 8080
  name: "Weather tools"
auth:
  issuer: "https://auth.example.com"
  required_scopes: ["openid"]
  tool_scopes:
    generate_image: ["images:write"]
  jwks_ttl: "5m"
payment:
  enabled: true
  ledger: icp
  allowance_url: "https://aaaaa-aa.icp0.io/allowances"
  prices:
    generate_image: 1000000
  retry_delay: "250ms"
ledgers:
  icp:
    url: "https://ledger.example.com"
treasury:
  owner: "owner-principal"
  account:
    owner: "service-principal"
beacon:
  enabled: true
  tracker_url: "https://tracker.example.com"
  interval: "10s"
  server_id: "aaaaa-aa"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.jwks_ttl, Duration::from_secs(300));
        assert_eq!(config.payment.retry_delay, Duration::from_millis(250));
        assert_eq!(config.payment.prices["generate_image"], 1_000_000);
        assert_eq!(config.treasury.account.owner.as_str(), "service-principal");
        assert!(config.treasury.account.subaccount.is_none());
        assert_eq!(config.beacon.interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn expiry_leeway_is_opt_in() {
        assert_eq!(AuthConfig::default().leeway_secs, 0);

        let config: Config = serde_yaml::from_str("auth:\n  leeway_secs: 30\n").unwrap();
        assert_eq!(config.auth.leeway_secs, 30);
    }

    #[test]
    fn validate_requires_owner() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_requires_payment_ledger_entry() {
        let mut config = valid_config();
        config.payment.enabled = true;
        config.payment.allowance_url = "https://example.com/allowances".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("payment.ledger"));
    }

    #[test]
    fn validate_requires_service_account_when_paying() {
        let mut config = valid_config();
        config.payment.enabled = true;
        config.payment.allowance_url = "https://example.com/allowances".to_string();
        config.ledgers.insert(
            "icp".to_string(),
            LedgerConfig {
                url: "http://ledger".to_string(),
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("treasury.account"));

        config.treasury.account.owner = "service-principal".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_tracker_when_beacon_enabled() {
        let mut config = valid_config();
        config.beacon.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tracker_url"));
    }

    #[test]
    fn expand_string_uses_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let out = Config::expand_string(&re, "${MCP_TOLLGATE_UNSET_VAR:-http://localhost}/x");
        assert_eq!(out, "http://localhost/x");
    }

    #[test]
    fn humantime_parses_millis_before_seconds() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let w: Wrapper = serde_yaml::from_str("d: 100ms").unwrap();
        assert_eq!(w.d, Duration::from_millis(100));
        let w: Wrapper = serde_yaml::from_str("d: 2h").unwrap();
        assert_eq!(w.d, Duration::from_secs(7200));
    }
}
