//! Generic configuration loading utilities.

use std::{fs, path::PathBuf};

use config::{Config, File, FileFormat};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Error when reading the configuration file.
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when parsing the configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Error when the configuration format is unsupported.
    #[error("Unsupported configuration format")]
    UnsupportedFormat,
}

/// A generic loader for YAML files.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new `ConfigLoader`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the list stored under the top-level `key` of the YAML file
    /// (e.g. "monitors", "destinations").
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, LoaderError> {
        if !self.is_yaml_file() {
            return Err(LoaderError::UnsupportedFormat);
        }

        let config_str = fs::read_to_string(&self.path)?;

        let config =
            Config::builder().add_source(File::from_str(&config_str, FileFormat::Yaml)).build()?;

        let items = config.get(key)?;

        Ok(items)
    }

    fn is_yaml_file(&self) -> bool {
        matches!(self.path.extension().and_then(|ext| ext.to_str()), Some("yaml") | Some("yml"))
    }
}

/// A type that can be loaded as a list from a configuration file.
pub trait Loadable: Sized + DeserializeOwned {
    /// The top-level key in the YAML file (e.g., "monitors").
    const KEY: &'static str;

    /// Settings the post-load step needs, such as throttle bounds or a
    /// host deny list.
    type Context;

    /// The specific error type for this loadable item.
    type Error: From<LoaderError>;

    /// Post-deserialization normalization and validation.
    fn validate(&mut self, _context: &Self::Context) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Loads and validates a list of `Loadable` items from a configuration file.
pub fn load_config<T: Loadable>(path: PathBuf, context: &T::Context) -> Result<Vec<T>, T::Error> {
    let loader = ConfigLoader::new(path);
    let mut items: Vec<T> = loader.load(T::KEY)?;

    for item in &mut items {
        item.validate(context)?;
    }

    Ok(items)
}
