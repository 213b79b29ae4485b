//! Layered configuration loading.
#![deny(warnings)]
#![deny(missing_docs)]

use std::borrow::Cow;

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Provider,
};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tether_error::GenericError;
use tracing::debug;

mod provider;
use self::provider::ResolvedProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration.", field))]
    MissingField {
        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field's data type was not the expected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Name of the invalid field.
        ///
        /// This is a period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to load configuration: {}", source))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            Kind::MissingField(field) => Self::MissingField { field },
            _ => Self::Generic { source: e.into() },
        }
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that can pull from various sources.
///
/// Sources are layered in the order they are added: later sources take precedence over earlier ones. Once all sources
/// are added, a typed value can be extracted with [`into_typed`][Self::into_typed].
///
/// # Supported sources
///
/// - YAML file
/// - JSON file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
#[derive(Default)]
pub struct ConfigurationLoader {
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let resolved_provider = ResolvedProvider::from_yaml(&path).map_err(GenericError::from).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    ///
    /// Errors include the file not existing, not being readable/accessible, and not being valid YAML.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<std::path::Path>,
    {
        match ResolvedProvider::from_yaml(&path) {
            Ok(resolved_provider) => {
                self.providers.push(BoxedProvider(Box::new(resolved_provider)));
            }
            Err(e) => {
                debug!(
                    error = %e,
                    file_path = %path.as_ref().to_string_lossy(),
                    "Unable to read YAML configuration file. Ignoring."
                );
            }
        }
        self
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid JSON, an error will be returned.
    pub fn from_json<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let resolved_provider = ResolvedProvider::from_json(&path).map_err(GenericError::from).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given will have an underscore appended to it if it does not already end with one. For example, with a
    /// prefix of `app`, any environment variable starting with `app_` would be matched. Nested keys are separated by a
    /// double underscore, so `APP_WORKER_POOL__CAPACITY` maps to `worker_pool.capacity`.
    ///
    /// The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        // `Env` is not `Send + Sync`, so snapshot it into a serialized provider.
        let values = Env::prefixed(&prefix).split("__").data()?;
        if let Some(default_dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
        }
        Ok(self)
    }

    /// Consumes the loader and deserializes the layered configuration into `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized into `T`, an error will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        figment.extract().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Settings {
        name: String,
        #[serde(default)]
        pool: PoolSettings,
    }

    #[derive(Debug, Default, Deserialize)]
    struct PoolSettings {
        #[serde(default)]
        capacity: i64,
    }

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_file_is_loaded() {
        let file = yaml_file("name: alpha\npool:\n  capacity: 4\n");
        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.name, "alpha");
        assert_eq!(settings.pool.capacity, 4);
    }

    #[test]
    fn json_file_is_loaded() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"name": "beta", "pool": {"capacity": 8}}"#).unwrap();

        let settings: Settings = ConfigurationLoader::default()
            .from_json(file.path())
            .unwrap()
            .into_typed()
            .unwrap();
        assert_eq!(settings.name, "beta");
        assert_eq!(settings.pool.capacity, 8);

        let mut broken = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        broken.write_all(b"{ not json").unwrap();
        assert!(matches!(
            ConfigurationLoader::default().from_json(broken.path()),
            Err(ConfigurationError::Generic { .. })
        ));
    }

    #[test]
    fn missing_yaml_file_is_an_error_unless_optional() {
        let result = ConfigurationLoader::default().from_yaml("/nonexistent/tether.yaml");
        assert!(matches!(result, Err(ConfigurationError::Generic { .. })));

        let loader = ConfigurationLoader::default().try_from_yaml("/nonexistent/tether.yaml");
        assert!(loader.providers.is_empty());
    }

    #[test]
    fn environment_overrides_file() {
        let file = yaml_file("name: alpha\npool:\n  capacity: 4\n");
        std::env::set_var("TETHERCFGTEST_POOL__CAPACITY", "16");

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .from_environment("TETHERCFGTEST")
            .unwrap()
            .into_typed()
            .unwrap();

        std::env::remove_var("TETHERCFGTEST_POOL__CAPACITY");
        assert_eq!(settings.name, "alpha");
        assert_eq!(settings.pool.capacity, 16);
    }

    #[test]
    fn empty_prefix_rejected() {
        let result = ConfigurationLoader::default().from_environment("");
        assert!(matches!(result, Err(ConfigurationError::EmptyPrefix)));
    }

    #[test]
    fn wrong_type_reports_field_path() {
        let file = yaml_file("name: alpha\npool:\n  capacity: lots\n");
        let result = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_typed::<Settings>();

        match result {
            Err(ConfigurationError::InvalidFieldType { field, .. }) => assert_eq!(field, "pool.capacity"),
            other => panic!("expected InvalidFieldType, got: {:?}", other),
        }
    }

    #[test]
    fn missing_field_reported() {
        let file = yaml_file("pool:\n  capacity: 1\n");
        let result = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_typed::<Settings>();

        assert!(matches!(result, Err(ConfigurationError::MissingField { .. })));
    }
}
