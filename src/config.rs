//! Environment-driven configuration (spec.md §6). Loaded once at startup;
//! `Config` itself is a side-effect-free value, in the style of the
//! teacher's `main.rs` env lookups.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Badger,
    Sqlite,
    None,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `MY_SERVER_KEY`; `None` disables the Authorization check entirely.
    pub api_key: Option<String>,
    pub storage_type: StorageType,
    pub storage_path: PathBuf,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("MY_SERVER_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let storage_type = match env::var("STORAGE_TYPE").unwrap_or_default().as_str() {
            "badger" => StorageType::Badger,
            "sqlite" => StorageType::Sqlite,
            "" | "none" => StorageType::None,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "STORAGE_TYPE".to_owned(),
                    value: other.to_owned(),
                })
            }
        };

        let storage_path = PathBuf::from(
            env::var("STORAGE_PATH").unwrap_or_else(|_| "./tmp/data".to_owned()),
        );

        let port = match env::var("PORT_NUMBER") {
            Ok(raw) => {
                let parsed = raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                    field: "PORT_NUMBER".to_owned(),
                    value: raw.clone(),
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "PORT_NUMBER".to_owned(),
                        value: raw,
                    });
                }
                parsed
            }
            Err(_) => 8080,
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        Ok(Self {
            api_key,
            storage_type,
            storage_path,
            port,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in ["MY_SERVER_KEY", "STORAGE_TYPE", "STORAGE_PATH", "PORT_NUMBER", "LOG_LEVEL"] {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let cfg = Config::from_env().unwrap();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.storage_type, StorageType::None);
        assert_eq!(cfg.storage_path, PathBuf::from("./tmp/data"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn empty_api_key_is_treated_as_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MY_SERVER_KEY", "");
        let cfg = Config::from_env().unwrap();
        assert!(cfg.api_key.is_none());
        clear_env();
    }

    #[test]
    fn invalid_storage_type_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("STORAGE_TYPE", "mongodb");
        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                field: "STORAGE_TYPE".to_owned(),
                value: "mongodb".to_owned()
            }
        );
        clear_env();
    }

    #[test]
    fn invalid_port_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PORT_NUMBER", "not-a-port");
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    fn zero_port_is_out_of_range_and_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PORT_NUMBER", "0");
        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                field: "PORT_NUMBER".to_owned(),
                value: "0".to_owned()
            }
        );
        clear_env();
    }
}
