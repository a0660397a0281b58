use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coupons::codegen::CodeGenerator;

pub const DEFAULT_ENCRYPTION_KEY: &str = "coupon-encryption-default-key-12345";
pub const DEFAULT_ENCRYPTION_IV: &str = "coupon-iv-12345";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub coupons: CouponConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CouponConfig {
    pub encryption_key: SecretString,
    pub encryption_iv: SecretString,
    pub max_generation_attempts: u32,
    pub page_size: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub encryption_key: Option<String>,
    pub encryption_iv: Option<String>,
    pub max_generation_attempts: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://couponkit.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            coupons: CouponConfig {
                encryption_key: secret_value(DEFAULT_ENCRYPTION_KEY.to_string()),
                encryption_iv: secret_value(DEFAULT_ENCRYPTION_IV.to_string()),
                max_generation_attempts: 16,
                page_size: 20,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl CouponConfig {
    /// Checks the generation and paging bounds on their own, for callers that build a
    /// `CouponConfig` without going through [`AppConfig::load`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_coupons(self)
    }

    pub fn has_key_material(&self) -> bool {
        !self.encryption_key.expose_secret().trim().is_empty()
            && !self.encryption_iv.expose_secret().trim().is_empty()
    }

    pub fn code_generator(&self) -> CodeGenerator {
        CodeGenerator::from_key_material(
            self.encryption_key.expose_secret(),
            self.encryption_iv.expose_secret(),
        )
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("couponkit.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(coupons) = patch.coupons {
            if let Some(encryption_key) = coupons.encryption_key {
                self.coupons.encryption_key = secret_value(encryption_key);
            }
            if let Some(encryption_iv) = coupons.encryption_iv {
                self.coupons.encryption_iv = secret_value(encryption_iv);
            }
            if let Some(max_generation_attempts) = coupons.max_generation_attempts {
                self.coupons.max_generation_attempts = max_generation_attempts;
            }
            if let Some(page_size) = coupons.page_size {
                self.coupons.page_size = page_size;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COUPONKIT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COUPONKIT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("COUPONKIT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COUPONKIT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COUPONKIT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COUPONKIT_COUPONS_ENCRYPTION_KEY") {
            self.coupons.encryption_key = secret_value(value);
        }
        if let Some(value) = read_env("COUPONKIT_COUPONS_ENCRYPTION_IV") {
            self.coupons.encryption_iv = secret_value(value);
        }
        if let Some(value) = read_env("COUPONKIT_COUPONS_MAX_GENERATION_ATTEMPTS") {
            self.coupons.max_generation_attempts =
                parse_u32("COUPONKIT_COUPONS_MAX_GENERATION_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("COUPONKIT_COUPONS_PAGE_SIZE") {
            self.coupons.page_size = parse_u32("COUPONKIT_COUPONS_PAGE_SIZE", &value)?;
        }

        let log_level =
            read_env("COUPONKIT_LOGGING_LEVEL").or_else(|| read_env("COUPONKIT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COUPONKIT_LOGGING_FORMAT").or_else(|| read_env("COUPONKIT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(encryption_key) = overrides.encryption_key {
            self.coupons.encryption_key = secret_value(encryption_key);
        }
        if let Some(encryption_iv) = overrides.encryption_iv {
            self.coupons.encryption_iv = secret_value(encryption_iv);
        }
        if let Some(max_generation_attempts) = overrides.max_generation_attempts {
            self.coupons.max_generation_attempts = max_generation_attempts;
        }
        if let Some(page_size) = overrides.page_size {
            self.coupons.page_size = page_size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_coupons(&self.coupons)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("couponkit.toml"), PathBuf::from("config/couponkit.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_coupons(coupons: &CouponConfig) -> Result<(), ConfigError> {
    if coupons.max_generation_attempts == 0 {
        return Err(ConfigError::Validation(
            "coupons.max_generation_attempts must be greater than zero".to_string(),
        ));
    }

    if coupons.page_size == 0 || coupons.page_size > 500 {
        return Err(ConfigError::Validation(
            "coupons.page_size must be in range 1..=500".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    coupons: Option<CouponPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CouponPatch {
    encryption_key: Option<String>,
    encryption_iv: Option<String>,
    max_generation_attempts: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_a_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.coupons.max_generation_attempts == 16, "default attempts should be 16")?;
        ensure(config.coupons.page_size == 20, "default page size should be 20")?;
        ensure(config.coupons.has_key_material(), "default key material should be present")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COUPON_KEY", "key-from-env");
        env::set_var("TEST_COUPON_IV", "iv-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("couponkit.toml");
            fs::write(
                &path,
                r#"
[coupons]
encryption_key = "${TEST_COUPON_KEY}"
encryption_iv = "${TEST_COUPON_IV}"
page_size = 50
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.coupons.encryption_key.expose_secret() == "key-from-env",
                "encryption key should be loaded from environment",
            )?;
            ensure(
                config.coupons.encryption_iv.expose_secret() == "iv-from-env",
                "encryption iv should be loaded from environment",
            )?;
            ensure(config.coupons.page_size == 50, "page size should come from the file")?;
            Ok(())
        })();

        clear_vars(&["TEST_COUPON_KEY", "TEST_COUPON_IV"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_COUPON_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("couponkit.toml");
        fs::write(&path, "[coupons]\nencryption_key = \"${TEST_COUPON_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_COUPON_UNSET"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COUPONKIT_LOG_LEVEL", "warn");
        env::set_var("COUPONKIT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["COUPONKIT_LOG_LEVEL", "COUPONKIT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COUPONKIT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("COUPONKIT_COUPONS_MAX_GENERATION_ATTEMPTS", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("couponkit.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[coupons]
max_generation_attempts = 8

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.coupons.max_generation_attempts == 4,
                "env generation attempts should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["COUPONKIT_DATABASE_URL", "COUPONKIT_COUPONS_MAX_GENERATION_ATTEMPTS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COUPONKIT_COUPONS_PAGE_SIZE", "lots");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "COUPONKIT_COUPONS_PAGE_SIZE"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["COUPONKIT_COUPONS_PAGE_SIZE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { page_size: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("coupons.page_size")
        );
        ensure(has_message, "validation failure should mention coupons.page_size")
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected missing file error".to_string()),
            Err(error) => error,
        };
        ensure(matches!(error, ConfigError::MissingConfigFile(_)), "missing file should be reported")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COUPONKIT_COUPONS_ENCRYPTION_KEY", "very-private-key-material");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("very-private-key-material"),
                "debug output should not contain key material",
            )?;
            ensure(
                !debug.contains(super::DEFAULT_ENCRYPTION_IV),
                "debug output should not contain the iv",
            )?;
            Ok(())
        })();

        clear_vars(&["COUPONKIT_COUPONS_ENCRYPTION_KEY"]);
        result
    }
}
