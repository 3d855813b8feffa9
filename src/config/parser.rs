//! Loading stack declarations from YAML with environment overrides.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StackError};

use super::spec::StackConfig;

/// Environment variables that override fields of the declaration.
pub const ENV_OVERRIDES: &[&str] = &[
    "STACKPLAN_PROJECT_NAME",
    "STACKPLAN_PROJECT_ENVIRONMENT",
    "STACKPLAN_STATE_BUCKET",
    "STACKPLAN_STATE_PREFIX",
    "STACKPLAN_PROVIDER_ENDPOINT",
];

/// Parser for stack declarations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is loaded from.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a declaration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a declaration from a YAML string.
    ///
    /// Malformed reference markers are reported here, with the YAML location.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML configuration");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = match (source, e.location()) {
                (Some(p), Some(loc)) => Some(format!("{}:{}:{}", p.display(), loc.line(), loc.column())),
                (Some(p), None) => Some(p.display().to_string()),
                (None, Some(loc)) => Some(format!("line {} column {}", loc.line(), loc.column())),
                (None, None) => None,
            };
            StackError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project {} ({} resources)",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads a declaration and applies `STACKPLAN_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    pub fn apply_env_overrides<F>(config: &mut StackConfig, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = var("STACKPLAN_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(environment) = var("STACKPLAN_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = environment;
        }

        if let Some(bucket) = var("STACKPLAN_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = var("STACKPLAN_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(endpoint) = var("STACKPLAN_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the `.env` file next to the declaration, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Configuration file names searched for, in order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stackplan.yaml",
    "stackplan.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the declaration in `start_dir` or any parent directory.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderBackend, StateBackend};
    use crate::model::{PropertyValue, ResourceKind};

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: web
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.deployment_id(), "web-dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.backend, ProviderBackend::Simulated);
        assert_eq!(config.provider.timeout_secs, 30);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_resources_keep_order_and_references() {
        let yaml = r"
project:
  name: web
  environment: prod
state:
  backend: s3
  bucket: stack-state
provider:
  backend: http
  endpoint: https://gateway.internal
resources:
  - id: vpc
    kind: network
    properties:
      is_default: true
  - id: lb
    kind: load_balancer
    properties:
      network: { ref: vpc.id }
      listener_port: 80
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[1].id, "lb");
        assert_eq!(config.resources[1].kind, ResourceKind::LoadBalancer);
        assert_eq!(
            config.resources[1].properties["network"],
            PropertyValue::reference("vpc", "id")
        );
    }

    #[test]
    fn test_malformed_reference_is_parse_error() {
        let yaml = r"
project:
  name: web
resources:
  - id: lb
    kind: load_balancer
    properties:
      network: { ref: vpc }
";
        let err = ConfigParser::new().parse_yaml(yaml, None).unwrap_err();
        assert!(matches!(err, StackError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let yaml = r"
project:
  name: web
resources:
  - id: bucket
    kind: s3_bucket
";
        assert!(ConfigParser::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new()
            .parse_yaml("project:\n  name: web\n", None)
            .unwrap();

        ConfigParser::apply_env_overrides(&mut config, |name| match name {
            "STACKPLAN_PROJECT_ENVIRONMENT" => Some(String::from("staging")),
            "STACKPLAN_PROVIDER_ENDPOINT" => Some(String::from("http://localhost:8080")),
            _ => None,
        });

        assert_eq!(config.deployment_id(), "web-staging");
        assert_eq!(config.provider.endpoint.as_deref(), Some("http://localhost:8080"));
        assert!(config.state.bucket.is_none());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("stack.yml"), "project:\n  name: web\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("stack.yml"));
    }
}
