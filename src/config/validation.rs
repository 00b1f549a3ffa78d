use crate::config::types::{Config, HarvestConfig, OutputConfig, SiteConfig};
use crate::sites::AdapterRegistry;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_output_config(&config.output)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates run behavior settings
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates site entries
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let registry = AdapterRegistry::with_builtin();
    let mut seen_keys = HashSet::new();
    let mut seen_names = HashSet::new();

    for site in sites {
        if !seen_keys.insert(site.key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate site key '{}'",
                site.key
            )));
        }

        if !seen_names.insert(site.short_name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate site short-name '{}'",
                site.short_name
            )));
        }

        if !registry.contains(&site.key) {
            return Err(ConfigError::Validation(format!(
                "No adapter registered for site key '{}' (known: {})",
                site.key,
                registry.keys().join(", ")
            )));
        }

        if site.short_name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Site '{}' must have a short-name",
                site.key
            )));
        }

        validate_http_url(&site.schedule_url, "schedule-url")?;
        validate_http_url(&site.base_url, "base-url")?;
        if let Some(image_base) = &site.image_base_url {
            validate_http_url(image_base, "image-base-url")?;
        }

        if !site.rate_limit_seconds.is_finite() || site.rate_limit_seconds < 0.0 {
            return Err(ConfigError::Validation(format!(
                "rate-limit-seconds for '{}' must be >= 0, got {}",
                site.key, site.rate_limit_seconds
            )));
        }

        let defaults = site.locations.iter().filter(|l| l.default).count();
        if defaults > 1 {
            return Err(ConfigError::Validation(format!(
                "Site '{}' declares {} default locations; at most one is allowed",
                site.key, defaults
            )));
        }
    }

    Ok(())
}

/// Validates that a URL parses and uses an HTTP(S) scheme
fn validate_http_url(raw: &str, field: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, raw
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn site_block(key: &str, short: &str, extra: &str) -> String {
        format!(
            r#"
[[site]]
key = "{key}"
name = "Site {short}"
short-name = "{short}"
schedule-url = "https://example.com/schedule"
base-url = "https://example.com/"
fetcher = "static"
{extra}
"#
        )
    }

    fn config_with(sites: &str) -> String {
        format!("[output]\ndatabase-path = \"./t.db\"\n{sites}")
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://example.com/", "base-url").is_ok());
        assert!(validate_http_url("http://127.0.0.1:8080/x", "base-url").is_ok());
        assert!(validate_http_url("ftp://example.com/", "base-url").is_err());
        assert!(validate_http_url("not a url", "base-url").is_err());
    }

    #[test]
    fn test_duplicate_site_key_rejected() {
        let content = config_with(&format!(
            "{}{}",
            site_block("sft", "A", ""),
            site_block("sft", "B", "")
        ));
        let err = parse_config(&content).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("Duplicate site key")));
    }

    #[test]
    fn test_unregistered_site_key_rejected() {
        let content = config_with(&site_block("nope", "N", ""));
        assert!(matches!(
            parse_config(&content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_negative_rate_limit_rejected() {
        let content = config_with(&site_block("sft", "S", "rate-limit-seconds = -1.0"));
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let content = format!(
            "[harvest]\nbatch-size = 0\n{}",
            config_with(&site_block("sft", "S", ""))
        );
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_two_default_locations_rejected() {
        let extra = r#"
[[site.location]]
town = "A"
default = true

[[site.location]]
town = "B"
default = true
"#;
        let content = config_with(&site_block("sft", "S", extra));
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_empty_database_path_rejected() {
        let content = "[output]\ndatabase-path = \"\"\n";
        assert!(parse_config(content).is_err());
    }
}
