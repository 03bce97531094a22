use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::delay::ExpectedProject;
use crate::models::{fold_key, same_key};

pub const TOKEN_ENV_VAR: &str = "ZONE01_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub catalog_path: PathBuf,
    #[serde(default)]
    pub promotions: Vec<PromotionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl FeedConfig {
    /// Token from the file, falling back to the environment.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|token| !token.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotionConfig {
    /// Event id on the progression platform, also used as the stored promo id.
    pub id: i64,
    pub title: String,
    pub expected: ExpectedProject,
    #[serde(default)]
    pub archived: bool,
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file; a relative catalog path is resolved against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml(&raw)?;
        if config.catalog_path.is_relative() {
            if let Some(parent) = path.parent() {
                config.catalog_path = parent.join(&config.catalog_path);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.base_url is empty".to_string()));
        }

        let mut ids = HashSet::new();
        let mut titles = HashSet::new();
        for promotion in &self.promotions {
            if !ids.insert(promotion.id) {
                return Err(ConfigError::Invalid(format!(
                    "promotion id {} is listed twice",
                    promotion.id
                )));
            }
            if !titles.insert(fold_key(&promotion.title)) {
                return Err(ConfigError::Invalid(format!(
                    "promotion {} is listed twice",
                    promotion.title
                )));
            }
        }
        Ok(())
    }

    pub fn promotion_by_title(&self, title: &str) -> Option<&PromotionConfig> {
        self.promotions
            .iter()
            .find(|promotion| same_key(&promotion.title, title))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
        catalog_path = "projects.json"

        [feed]
        base_url = "https://zone01.example/api/v1/"

        [[promotions]]
        id = 32
        title = "P1 2024"
        expected = "forum"

        [[promotions]]
        id = 40
        title = "P2 2024"
        expected = { rust = "smart-road", java = "lets-play" }

        [[promotions]]
        id = 12
        title = "P1 2022"
        expected = "Fin"
        archived = true
    "#;

    #[test]
    fn parses_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.promotions.len(), 3);
        assert_eq!(config.feed.timeout_secs, 30);
        assert!(config.promotions[2].archived);
        assert_eq!(
            config.promotion_by_title("p2 2024").unwrap().expected,
            ExpectedProject::Elective {
                rust: Some("smart-road".to_string()),
                java: Some("lets-play".to_string()),
            }
        );
        assert_eq!(config.promotions[2].expected, ExpectedProject::Finished);
    }

    #[test]
    fn rejects_duplicate_promotions() {
        let raw = r#"
            catalog_path = "projects.json"
            [feed]
            base_url = "https://zone01.example"
            [[promotions]]
            id = 1
            title = "P1"
            expected = "forum"
            [[promotions]]
            id = 1
            title = "P2"
            expected = "forum"
        "#;
        assert!(matches!(Config::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_base_url() {
        let raw = r#"
            catalog_path = "projects.json"
            [feed]
            base_url = " "
        "#;
        assert!(matches!(Config::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn catalog_path_is_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone01.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.catalog_path, dir.path().join("projects.json"));
    }

    #[test]
    fn explicit_token_wins() {
        let feed = FeedConfig {
            base_url: "https://zone01.example".to_string(),
            token: Some("secret".to_string()),
            timeout_secs: 5,
        };
        assert_eq!(feed.resolved_token().as_deref(), Some("secret"));
    }
}
