use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tickstash_core::{AppConfig, Credentials};
use tickstash_warehouse::resolve_tickstash_home;
use tracing::debug;

use crate::error::CliError;

const DEFAULT_FILE_NAME: &str = "config.yaml";

/// Reads the YAML configuration, layers environment credentials over it and validates.
///
/// An explicit `path` must exist. Without one, `$TICKSTASH_HOME/config.yaml` is
/// used when present and built-in defaults otherwise.
pub fn load(path: Option<&Path>, credentials: &Credentials) -> Result<AppConfig, CliError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => {
            let default_path = resolve_tickstash_home().join(DEFAULT_FILE_NAME);
            match fs::read_to_string(&default_path) {
                Ok(text) => parse(&default_path, &text)?,
                Err(error) if error.kind() == ErrorKind::NotFound => {
                    debug!(path = %default_path.display(), "no config file; using defaults");
                    AppConfig::default()
                }
                Err(error) => return Err(error.into()),
            }
        }
    };

    config.apply_credentials(credentials);
    config.validate()?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<AppConfig, CliError> {
    let text = fs::read_to_string(path)?;
    parse(path, &text)
}

fn parse(path: &Path, text: &str) -> Result<AppConfig, CliError> {
    debug!(path = %path.display(), "loading config");
    serde_yaml::from_str(text).map_err(|source| CliError::ConfigFile {
        path: PathBuf::from(path),
        source,
    })
}
