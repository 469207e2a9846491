//! Loading run specifications from YAML

use super::schema::IncrementalSpec;
use super::validate::validate_config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Parse a spec from YAML text and validate it
pub fn parse_config(yaml: &str) -> Result<IncrementalSpec> {
    let spec: IncrementalSpec = serde_yaml::from_str(yaml)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {e}")))?;
    validate_config(&spec).map_err(|e| Error::ConfigError(format!("Invalid config: {e}")))?;
    Ok(spec)
}

/// Load a spec from a YAML file and validate it
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<IncrementalSpec> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;
    parse_config(&yaml_content)
}
