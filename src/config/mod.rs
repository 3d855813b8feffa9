//! Configuration module.
//!
//! This module handles the stack declaration:
//! - Parsing `stackplan.yaml` with environment overrides and `.env` loading
//! - Validating project, state and provider settings
//! - Hashing declarations and property bags for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_OVERRIDES};
pub use spec::{
    ProjectConfig, ProviderBackend, ProviderConfig, ResourceConfig, StackConfig, StateBackend,
    StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
