//! Settings for the field cipher and logging. Values come from an optional JSON
//! file overlaid by `MAGMA_*` environment variables; the key itself never lives
//! in either, only the name of the variable that holds it.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::crypto::cipher::{CipherError, FieldCipher, DEFAULT_KEY_ENV};

/// Prefix for environment overrides, e.g. `MAGMA_KEY_ENV`.
pub const ENV_PREFIX: &str = "MAGMA";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cipher setup failed: {0}")]
    Cipher(#[from] CipherError),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(format!("{err}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Environment variable holding the raw 32-byte field key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
    /// Re-read the key on every operation so rotation needs no restart.
    #[serde(default = "default_key_reload")]
    pub key_reload: bool,
    /// Tracing filter directive (e.g. `"info"`, `"magma_crypto=debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.into()
}
fn default_key_reload() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
            key_reload: default_key_reload(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if any) and `MAGMA_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`Settings::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Json));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = self.key_env.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid("key_env must not be empty".into()));
        }
        if name.contains(['=', '\0']) {
            return Err(ConfigError::Invalid(format!("key_env {name:?} is not a valid variable name")));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".into()));
        }
        Ok(())
    }

    /// Builds the field cipher described by these settings. With `key_reload`
    /// off, the key is read and checked here instead of on first use.
    pub fn build_cipher(&self) -> Result<FieldCipher, ConfigError> {
        if self.key_reload {
            return Ok(FieldCipher::from_env(self.key_env.trim()));
        }
        Ok(FieldCipher::from_env_once(self.key_env.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, LogFormat, Settings};
    use serde_json::json;
    use std::fs;

    fn json_file(payload: &serde_json::Value) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temp file");
        fs::write(file.path(), serde_json::to_vec(payload).unwrap()).unwrap();
        file
    }

    #[test]
    fn defaults_are_correct() {
        let settings = Settings::load_with_prefix(None, "MAGMA_TEST_CFG_DEFAULTS").unwrap();
        assert_eq!(settings.key_env, "ENCRYPTION_KEY");
        assert!(settings.key_reload);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.log_format, LogFormat::Pretty);
    }

    #[test]
    fn loads_from_file() {
        let file = json_file(&json!({
            "key_env": "MAGMA_TEST_CFG_FILE_KEY",
            "key_reload": false,
            "log_level": "debug",
            "log_format": "json"
        }));
        let settings = Settings::load_with_prefix(Some(file.path()), "MAGMA_TEST_CFG_FILE").unwrap();
        assert_eq!(settings.key_env, "MAGMA_TEST_CFG_FILE_KEY");
        assert!(!settings.key_reload);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn environment_overrides_file() {
        let file = json_file(&json!({ "log_level": "debug" }));
        std::env::set_var("MAGMA_TEST_CFG_ENV_LOG_LEVEL", "warn");
        let settings = Settings::load_with_prefix(Some(file.path()), "MAGMA_TEST_CFG_ENV").unwrap();
        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn validate_rejects_empty_key_env() {
        let file = json_file(&json!({ "key_env": "  " }));
        let err = Settings::load_with_prefix(Some(file.path()), "MAGMA_TEST_CFG_EMPTY").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn builds_pinned_cipher_and_fails_fast() {
        let settings = Settings {
            key_env: "MAGMA_TEST_CFG_PINNED_KEY".into(),
            key_reload: false,
            ..Settings::default()
        };
        std::env::set_var("MAGMA_TEST_CFG_PINNED_KEY", "shortkey");
        assert!(matches!(settings.build_cipher(), Err(ConfigError::Cipher(_))));

        std::env::set_var("MAGMA_TEST_CFG_PINNED_KEY", "thisis32bitlongpassphraseimusing");
        let cipher = settings.build_cipher().unwrap();
        let envelope = cipher.encrypt("Hello, Blue Magma!").unwrap();
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "Hello, Blue Magma!");
    }

    #[test]
    fn reloading_cipher_defers_key_lookup() {
        let settings = Settings {
            key_env: "MAGMA_TEST_CFG_DEFERRED_KEY".into(),
            ..Settings::default()
        };
        let cipher = settings.build_cipher().expect("no key needed yet");
        assert!(cipher.encrypt("x").is_err());
    }
}
