use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use couponkit_core::config::{AppConfig, LoadOptions, DEFAULT_ENCRYPTION_IV, DEFAULT_ENCRYPTION_KEY};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries = [
        (
            "database.url",
            config.database.url.clone(),
            source("database.url", &["COUPONKIT_DATABASE_URL"]),
        ),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            source("database.max_connections", &["COUPONKIT_DATABASE_MAX_CONNECTIONS"]),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            source("database.timeout_secs", &["COUPONKIT_DATABASE_TIMEOUT_SECS"]),
        ),
        (
            "coupons.encryption_key",
            redact_secret(config.coupons.encryption_key.expose_secret(), DEFAULT_ENCRYPTION_KEY),
            source("coupons.encryption_key", &["COUPONKIT_COUPONS_ENCRYPTION_KEY"]),
        ),
        (
            "coupons.encryption_iv",
            redact_secret(config.coupons.encryption_iv.expose_secret(), DEFAULT_ENCRYPTION_IV),
            source("coupons.encryption_iv", &["COUPONKIT_COUPONS_ENCRYPTION_IV"]),
        ),
        (
            "coupons.max_generation_attempts",
            config.coupons.max_generation_attempts.to_string(),
            source("coupons.max_generation_attempts", &["COUPONKIT_COUPONS_MAX_GENERATION_ATTEMPTS"]),
        ),
        (
            "coupons.page_size",
            config.coupons.page_size.to_string(),
            source("coupons.page_size", &["COUPONKIT_COUPONS_PAGE_SIZE"]),
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            source("logging.level", &["COUPONKIT_LOGGING_LEVEL", "COUPONKIT_LOG_LEVEL"]),
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            source("logging.format", &["COUPONKIT_LOGGING_FORMAT", "COUPONKIT_LOG_FORMAT"]),
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.iter().map(|(key, value, source)| render_line(key, value, source)));
    if !config.coupons.has_key_material() {
        lines.push("warning: encryption key material is empty; sealed codes are disabled".to_string());
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("couponkit.toml"), PathBuf::from("config/couponkit.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: &str) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str, built_in: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else if trimmed == built_in {
        "<built-in default>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret, render_line};

    #[test]
    fn secrets_are_never_rendered() {
        assert_eq!(redact_secret("", "dflt"), "<empty>");
        assert_eq!(redact_secret("dflt", "dflt"), "<built-in default>");
        assert_eq!(redact_secret("prod-key-123", "dflt"), "<redacted>");
    }

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: toml::Value = "[coupons]\npage_size = 50\n".parse().expect("toml");

        assert!(contains_path(&doc, "coupons.page_size"));
        assert!(!contains_path(&doc, "coupons.encryption_key"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn lines_name_their_source() {
        assert_eq!(
            render_line("coupons.page_size", "50", "default"),
            "- coupons.page_size = 50 (source: default)"
        );
    }
}
