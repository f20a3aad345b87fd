//! Configuration system for magpie.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{MagpieError, MagpieResult};
use crate::ratelimit::RateLimitConfig;
use crate::resolution::ResolutionConfig;
use crate::retrieval::RetrievalConfig;
use crate::similarity::SimilarityConfig;

/// Embedded graph store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let magpie_dir = dirs::home_dir()
            .map(|h| h.join(".magpie"))
            .unwrap_or_else(|| PathBuf::from(".magpie"));

        Self {
            path: magpie_dir.join("graph.db"),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Similarity weights.
    pub similarity: SimilarityConfig,
    /// Entity resolution thresholds and retry policy.
    pub resolution: ResolutionConfig,
    /// Query-time settings.
    pub retrieval: RetrievalConfig,
    /// Embedding request limits.
    pub rate_limit: RateLimitConfig,
    /// Graph store location.
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load configuration from a file (TOML, JSON, or YAML) and validate it.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> MagpieResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| MagpieError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MagpieError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| MagpieError::Configuration(e.to_string()))?,
            _ => {
                return Err(MagpieError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MAGPIE_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `MAGPIE_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var(&lookup, "MAGPIE_CLUSTER_THRESHOLD") {
            self.resolution.cluster_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "MAGPIE_LINK_THRESHOLD") {
            self.resolution.link_threshold = v;
        }
        if let Some(v) = parse_var::<f32>(&lookup, "MAGPIE_GROUNDING_THRESHOLD") {
            self.resolution.grounding_threshold = v;
            self.retrieval.grounding_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "MAGPIE_RRF_K") {
            self.retrieval.rrf_k = v;
        }
        if let Some(v) = parse_var(&lookup, "MAGPIE_MAX_HOPS") {
            self.retrieval.max_hops = v;
        }
        if let Some(v) = parse_var(&lookup, "MAGPIE_EMBED_RPM") {
            self.rate_limit.requests_per_minute = v;
        }
        if let Some(v) = parse_var(&lookup, "MAGPIE_EMBED_CONCURRENCY") {
            self.rate_limit.max_concurrency = v;
        }

        // Store path
        if let Some(path) = lookup("MAGPIE_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }

        self
    }

    /// Validate every section.
    pub fn validate(&self) -> MagpieResult<()> {
        let sections: [(&str, Result<(), &'static str>); 4] = [
            ("similarity", self.similarity.validate()),
            ("resolution", self.resolution.validate()),
            ("retrieval", self.retrieval.validate()),
            ("rate_limit", self.rate_limit.validate()),
        ];
        for (section, result) in sections {
            result.map_err(|e| MagpieError::Configuration(format!("{}: {}", section, e)))?;
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// Builder for EngineConfig.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set similarity configuration.
    pub fn similarity(mut self, config: SimilarityConfig) -> Self {
        self.config.similarity = config;
        self
    }

    /// Set resolution configuration.
    pub fn resolution(mut self, config: ResolutionConfig) -> Self {
        self.config.resolution = config;
        self
    }

    /// Set retrieval configuration.
    pub fn retrieval(mut self, config: RetrievalConfig) -> Self {
        self.config.retrieval = config;
        self
    }

    /// Set rate limit configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Set the store path.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store.path = path.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MagpieResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.store.path.ends_with(".magpie/graph.db"));
    }

    #[test]
    fn test_from_toml_keeps_defaults_for_missing_keys() {
        let file = write_config(
            ".toml",
            r#"
[resolution]
cluster_threshold = 0.8

[retrieval]
max_hops = 3
"#,
        );
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.resolution.cluster_threshold, 0.8);
        assert_eq!(config.resolution.link_threshold, 0.9);
        assert_eq!(config.retrieval.max_hops, 3);
        assert_eq!(config.retrieval.rrf_k, 60.0);
    }

    #[test]
    fn test_from_json_and_yaml() {
        let json = write_config(".json", r#"{"rate_limit": {"requests_per_minute": 120}}"#);
        let config = EngineConfig::from_file(json.path()).unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 120);

        let yaml = write_config(".yaml", "store:\n  path: /tmp/magpie.db\n");
        let config = EngineConfig::from_file(yaml.path()).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/magpie.db"));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let file = write_config(".toml", "[retrieval]\nrrf_k = 0.0\n");
        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, MagpieError::Configuration(ref msg) if msg.starts_with("retrieval")));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config(".ini", "x = 1");
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(MagpieError::Configuration(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            ("MAGPIE_CLUSTER_THRESHOLD", "0.8"),
            ("MAGPIE_GROUNDING_THRESHOLD", "0.7"),
            ("MAGPIE_EMBED_RPM", "not-a-number"),
            ("MAGPIE_STORE_PATH", "/var/lib/magpie.db"),
        ]);
        let config = EngineConfig::default().with_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.resolution.cluster_threshold, 0.8);
        assert_eq!(config.resolution.grounding_threshold, 0.7);
        assert_eq!(config.retrieval.grounding_threshold, 0.7);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/magpie.db"));
    }

    #[test]
    fn test_builder_validates() {
        let bad = EngineConfig::builder()
            .rate_limit(RateLimitConfig {
                max_concurrency: 0,
                ..Default::default()
            })
            .build();
        assert!(bad.is_err());

        let good = EngineConfig::builder().store_path("/tmp/g.db").build().unwrap();
        assert_eq!(good.store.path, PathBuf::from("/tmp/g.db"));
    }
}
