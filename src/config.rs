//! Service settings, read from the environment (and `.env` when present)

use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub paystack: PaystackSettings,
    pub delivery: DeliveryConfig,
    pub purchase: PurchaseConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Run against the in-memory store with no outbound calls
    pub skip_externals: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Paystack checkout settings
#[derive(Debug, Clone)]
pub struct PaystackSettings {
    pub secret_key: String,
    pub base_url: String,
    pub webhook_secret: Option<String>,
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Delivery provider settings
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// `legacy` or `vtpass`
    pub provider: String,
    pub legacy_base_url: String,
    pub legacy_api_token: String,
    pub vtpass_base_url: String,
    pub vtpass_api_key: String,
    pub vtpass_secret_key: String,
    pub vtpass_public_key: String,
    pub timeout_secs: u64,
    /// Shared secret expected in `x-webhook-secret` on delivery callbacks
    pub webhook_secret: Option<String>,
}

/// Purchase limits
#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    pub max_retries: u32,
    pub min_airtime_kobo: i64,
    pub max_airtime_kobo: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let server = ServerConfig::from_env()?;
        let database = if server.skip_externals {
            DatabaseConfig::from_env().unwrap_or_else(|_| DatabaseConfig::unused())
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            server,
            database,
            logging: LoggingConfig::from_env()?,
            paystack: PaystackSettings::from_env()?,
            delivery: DeliveryConfig::from_env()?,
            purchase: PurchaseConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.purchase.validate()?;
        self.delivery.validate()?;

        // Credentials only matter when we actually talk to the outside world
        if !self.server.skip_externals {
            self.database.validate()?;
            self.paystack.validate()?;
            self.delivery.validate_credentials()?;
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
            skip_externals: env::var("SKIP_EXTERNALS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    fn unused() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
            connection_timeout: 30,
            idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl PaystackSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaystackSettings {
            secret_key: env::var("PAYSTACK_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            webhook_secret: optional_var("PAYSTACK_WEBHOOK_SECRET"),
            callback_url: optional_var("PAYSTACK_CALLBACK_URL"),
            timeout_secs: parse_var("PAYSTACK_TIMEOUT_SECS", "30")?,
            max_retries: parse_var("PAYSTACK_MAX_RETRIES", "2")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "PAYSTACK_SECRET_KEY".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYSTACK_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DeliveryConfig {
            provider: env::var("DELIVERY_PROVIDER")
                .unwrap_or_else(|_| "vtpass".to_string())
                .to_lowercase(),
            legacy_base_url: env::var("LEGACY_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://www.smedata.example/api".to_string()),
            legacy_api_token: env::var("LEGACY_PROVIDER_API_TOKEN").unwrap_or_default(),
            vtpass_base_url: env::var("VTPASS_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.vtpass.com".to_string()),
            vtpass_api_key: env::var("VTPASS_API_KEY").unwrap_or_default(),
            vtpass_secret_key: env::var("VTPASS_SECRET_KEY").unwrap_or_default(),
            vtpass_public_key: env::var("VTPASS_PUBLIC_KEY").unwrap_or_default(),
            timeout_secs: parse_var("DELIVERY_TIMEOUT_SECS", "30")?,
            webhook_secret: optional_var("DELIVERY_WEBHOOK_SECRET"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.provider.as_str(), "legacy" | "vtpass") {
            return Err(ConfigError::InvalidValue(format!(
                "DELIVERY_PROVIDER must be 'legacy' or 'vtpass', got '{}'",
                self.provider
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "DELIVERY_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        match self.provider.as_str() {
            "legacy" if self.legacy_api_token.is_empty() => Err(ConfigError::MissingVariable(
                "LEGACY_PROVIDER_API_TOKEN".to_string(),
            )),
            "vtpass" if self.vtpass_api_key.is_empty() || self.vtpass_secret_key.is_empty() => {
                Err(ConfigError::MissingVariable(
                    "VTPASS_API_KEY/VTPASS_SECRET_KEY".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

impl PurchaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PurchaseConfig {
            max_retries: parse_var("MAX_RETRIES", "3")?,
            min_airtime_kobo: parse_var("MIN_AIRTIME_KOBO", "5000")?,
            max_airtime_kobo: parse_var("MAX_AIRTIME_KOBO", "5000000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_airtime_kobo <= 0 || self.min_airtime_kobo > self.max_airtime_kobo {
            return Err(ConfigError::ValidationFailed(
                "MIN_AIRTIME_KOBO must be positive and <= MAX_AIRTIME_KOBO".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_airtime_kobo: 5_000,
            max_airtime_kobo: 5_000_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
