//! Environment-driven dialer configuration.
//!
//! All options come from the process environment and are re-read on every
//! `GET /start`. Parsing goes through a plain map so it can be unit-tested
//! without mutating the environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DialerError, Result};

/// Complete dialer configuration
#[derive(Debug, Clone)]
pub struct DialerConfig {
    /// ARI endpoint and credentials
    pub ari: AriConfig,
    /// Number source, concurrency and partner-leg targeting
    pub dialing: DialingConfig,
    /// Recording directory and format
    pub recording: RecordingConfig,
    /// Summary persistence; `None` disables the MySQL writer
    pub database: Option<DatabaseConfig>,
    /// Control surface binding
    pub http: HttpConfig,
}

/// ARI endpoint settings
#[derive(Debug, Clone)]
pub struct AriConfig {
    /// Base URL of the ARI REST root, e.g. `http://127.0.0.1:8088/ari`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Trunk name used in the outbound endpoint `PJSIP/<number>@<trunk>`
    pub trunk: String,
    /// Stasis application name both legs are originated into
    pub stasis_app: String,
}

/// Dial orchestration settings
#[derive(Debug, Clone)]
pub struct DialingConfig {
    /// Single inline destination number
    pub outbound_number: Option<String>,
    /// Newline-delimited number file; wins over the inline number when both
    /// are set
    pub outbound_number_file: Option<PathBuf>,
    /// Explicit partner endpoint; when unset the partner leg dials
    /// `Local/<extension>@<context>`
    pub target_endpoint: Option<String>,
    pub target_extension: String,
    pub target_context: String,
    /// Call-setup timeout passed to Asterisk, seconds
    pub call_timeout: u64,
    /// Maximum concurrent in-flight calls
    pub max_cc: usize,
    pub caller_id: Option<String>,
}

impl DialingConfig {
    /// Endpoint the partner (leg B) originate dials.
    pub fn partner_endpoint(&self) -> String {
        self.target_endpoint.clone().unwrap_or_else(|| {
            format!("Local/{}@{}", self.target_extension, self.target_context)
        })
    }

    /// The number leg B is considered to target, derived from the partner
    /// dial string.
    pub fn partner_target_number(&self) -> String {
        match &self.target_endpoint {
            Some(endpoint) => {
                // `Tech/resource@context` → resource
                let after_tech = endpoint.split('/').next_back().unwrap_or(endpoint);
                after_tech.split('@').next().unwrap_or(after_tech).to_string()
            }
            None => self.target_extension.clone(),
        }
    }

    /// Cleanup watchdog delay for one call.
    pub fn watchdog_delay(&self) -> Duration {
        let from_timeout = self.call_timeout.saturating_mul(1000) + 15_000;
        Duration::from_millis(from_timeout.max(45_000))
    }
}

/// Recording settings
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Canonical directory recordings end up in
    pub directory: PathBuf,
    pub format: String,
}

/// MySQL summary-table settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Control surface settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Loopback port for `GET /start`
    pub port: u16,
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match vars.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(DialerError::configuration(format!("{key} is required"))),
    }
}

fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match optional(vars, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| DialerError::configuration(format!("{key} is not a valid number: {raw}"))),
        None => Ok(default),
    }
}

impl DialerConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load and validate configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let database = match optional(vars, "MYSQL_HOST") {
            Some(host) => Some(DatabaseConfig {
                host,
                port: parse_number(vars, "MYSQL_PORT", 3306u16)?,
                user: required(vars, "MYSQL_USER")?,
                password: optional(vars, "MYSQL_PASSWORD").unwrap_or_default(),
                database: required(vars, "MYSQL_DATABASE")?,
                table: optional(vars, "MYSQL_TABLE")
                    .unwrap_or_else(|| "call_leg_timelines".to_string()),
            }),
            None => None,
        };

        let config = Self {
            ari: AriConfig {
                url: required(vars, "ARI_URL")?,
                username: required(vars, "ARI_USERNAME")?,
                password: required(vars, "ARI_PASSWORD")?,
                trunk: required(vars, "ARI_TRUNK")?,
                stasis_app: optional(vars, "STASIS_APP")
                    .unwrap_or_else(|| "outbound_dialer".to_string()),
            },
            dialing: DialingConfig {
                outbound_number: optional(vars, "OUTBOUND_NUMBER"),
                outbound_number_file: optional(vars, "OUTBOUND_NUMBER_FILE").map(PathBuf::from),
                target_endpoint: optional(vars, "TARGET_ENDPOINT"),
                target_extension: optional(vars, "TARGET_EXTENSION")
                    .unwrap_or_else(|| "777".to_string()),
                target_context: optional(vars, "TARGET_CONTEXT")
                    .unwrap_or_else(|| "default2".to_string()),
                call_timeout: parse_number(vars, "CALL_TIMEOUT", 30u64)?,
                max_cc: parse_number(vars, "MAX_CC", 1usize)?,
                caller_id: optional(vars, "CALLER_ID"),
            },
            recording: RecordingConfig {
                directory: PathBuf::from(required(vars, "RECORDINGS_DIR")?),
                format: optional(vars, "RECORDING_FORMAT").unwrap_or_else(|| "wav".to_string()),
            },
            database,
            http: HttpConfig { port: parse_number(vars, "HTTP_PORT", 3000u16)? },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.dialing.max_cc == 0 {
            return Err(DialerError::configuration("MAX_CC must be a positive integer"));
        }
        if self.dialing.outbound_number.is_none() && self.dialing.outbound_number_file.is_none() {
            return Err(DialerError::configuration(
                "one of OUTBOUND_NUMBER or OUTBOUND_NUMBER_FILE is required",
            ));
        }
        if self.dialing.call_timeout == 0 {
            return Err(DialerError::configuration("CALL_TIMEOUT must be positive"));
        }
        Ok(())
    }
}
