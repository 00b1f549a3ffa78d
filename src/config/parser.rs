use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stored with every run so that results can be traced back to
/// the configuration that produced them.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"
[harvest]
batch-size = 5
max-retries = 2

[output]
database-path = "./test.db"

[locations]
known-towns = ["Downtown", "North York"]

[[site]]
key = "sft"
name = "SexyFriendsToronto"
short-name = "SFT"
schedule-url = "https://www.example.com/schedule"
base-url = "https://www.example.com/"
fetcher = "static"
rate-limit-seconds = 1.5

[[site.tier]]
name = "Elite"
stars = 1
incall-1hr = "$260"

[[site]]
key = "dd"
name = "DiscreetDolls"
short-name = "DD"
schedule-url = "https://dolls.example.com/daily-schedule/"
base-url = "https://dolls.example.com/"
fetcher = "stealth"
enabled = false
auto-create-locations = true

[[site.location]]
town = "Downtown"
detail = "Richmond-Peter"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.harvest.batch_size, 5);
        assert_eq!(config.harvest.max_retries, 2);
        assert_eq!(config.harvest.max_error_details, 10);
        assert_eq!(config.sites.len(), 2);
        assert_eq!(config.locations.known_towns.len(), 2);

        let sft = config.site("sft").unwrap();
        assert_eq!(sft.fetcher, FetcherKind::Static);
        assert_eq!(sft.rate_limit_seconds, 1.5);
        assert!(sft.enabled);
        assert_eq!(sft.tiers[0].incall_1hr.as_deref(), Some("$260"));

        let dd = config.site("dd").unwrap();
        assert_eq!(dd.fetcher, FetcherKind::Stealth);
        assert!(dd.auto_create_locations);
        assert_eq!(dd.locations[0].detail, "Richmond-Peter");
        assert_eq!(config.enabled_sites().count(), 1);
    }

    #[test]
    fn test_browser_defaults_apply() {
        let config = parse_config(VALID).unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.viewport_width, 1920);
        assert_eq!(config.browser.timezone, "America/Toronto");
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../../harvest.example.toml")).unwrap();
        assert_eq!(config.locations.known_towns.len(), 24);
        assert_eq!(config.enabled_sites().count(), 3);
        assert_eq!(config.site("dd").unwrap().tiers.len(), 4);
        assert_eq!(config.site("mirage").unwrap().tiers.len(), 3);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_fetcher_kind_rejected() {
        let content = VALID.replace("fetcher = \"static\"", "fetcher = \"carrier-pigeon\"");
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(VALID);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.sites.len(), 2);
        assert_eq!(hash.len(), 64);
    }
}
