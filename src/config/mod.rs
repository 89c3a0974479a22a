use anyhow::{Result, bail};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::imaging::NormalizeOptions;

/// Configuration for the application
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SQLite connection URL for the project store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Upper bound on pooled store connections
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// Width images are scaled down to before encoding
    #[serde(default = "default_image_max_width")]
    pub image_max_width: u32,

    /// Starting encoder quality, 0.0 to 1.0
    #[serde(default = "default_image_quality")]
    pub image_quality: f32,

    /// Size bound for a single encoded image, in megabytes
    #[serde(default = "default_image_max_encoded_mb")]
    pub image_max_encoded_mb: f64,
}

fn default_database_url() -> String {
    "sqlite://projects.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_image_max_width() -> u32 {
    crate::imaging::DEFAULT_MAX_WIDTH
}

fn default_image_quality() -> f32 {
    crate::imaging::DEFAULT_QUALITY
}

fn default_image_max_encoded_mb() -> f64 {
    crate::imaging::MAX_ENCODED_MB
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// This function will:
    /// 1. Load variables from .env file if it exists
    /// 2. Deserialize environment variables into Config struct
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenv().ok();

        // Parse environment variables into Config struct
        let config = envy::from_env::<Config>()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject image settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.image_max_width == 0 {
            bail!("IMAGE_MAX_WIDTH must be at least 1");
        }
        if !self.image_quality.is_finite() {
            bail!("IMAGE_QUALITY must be a number between 0.0 and 1.0");
        }
        if !self.image_max_encoded_mb.is_finite() || self.image_max_encoded_mb <= 0.0 {
            bail!("IMAGE_MAX_ENCODED_MB must be greater than zero");
        }

        Ok(())
    }

    /// Build a configuration pointing at the given database, with defaults elsewhere
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: default_max_connections(),
            image_max_width: default_image_max_width(),
            image_quality: default_image_quality(),
            image_max_encoded_mb: default_image_max_encoded_mb(),
        }
    }

    /// Get a direct reference to the database URL
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Pipeline settings derived from the image keys
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            max_width: self.image_max_width,
            quality: self.image_quality,
            max_encoded_mb: self.image_max_encoded_mb,
        }
    }
}

/// Initialize environment variables and load configuration
pub fn init() -> Result<Config> {
    // Ensure .env file is loaded
    dotenv().ok();

    // Load the configuration
    let config = Config::load()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(config.database_url(), "sqlite://projects.db");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.image_max_width, 1080);
        assert!((config.image_quality - 0.7).abs() < f32::EPSILON);
        assert!((config.image_max_encoded_mb - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "sqlite://other.db".to_string()),
            ("IMAGE_MAX_WIDTH".to_string(), "640".to_string()),
            ("IMAGE_QUALITY".to_string(), "0.5".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.database_url(), "sqlite://other.db");
        let options = config.normalize_options();
        assert_eq!(options.max_width, 640);
        assert!((options.quality - 0.5).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    fn config_from(key: &str, value: &str) -> Config {
        envy::from_iter(vec![(key.to_string(), value.to_string())]).unwrap()
    }

    #[test]
    fn zero_max_width_is_rejected() {
        let err = config_from("IMAGE_MAX_WIDTH", "0").validate().unwrap_err();
        assert!(err.to_string().contains("IMAGE_MAX_WIDTH"));
    }

    #[test]
    fn non_finite_quality_is_rejected() {
        assert!(config_from("IMAGE_QUALITY", "NaN").validate().is_err());
        assert!(config_from("IMAGE_QUALITY", "inf").validate().is_err());
    }

    #[test]
    fn non_positive_size_bound_is_rejected() {
        assert!(config_from("IMAGE_MAX_ENCODED_MB", "0").validate().is_err());
        assert!(config_from("IMAGE_MAX_ENCODED_MB", "-1.5").validate().is_err());
        assert!(config_from("IMAGE_MAX_ENCODED_MB", "NaN").validate().is_err());
    }
}
