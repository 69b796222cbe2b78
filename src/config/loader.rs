use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;

use super::schema::{Config, StoreConfig};
use crate::error::{ConfigError, Result};

/// Loads configuration from the conventional file names layered under
/// `TAMPER_PROXY_`-prefixed environment variables.
pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("tamper-proxy.toml"))
        .merge(Json::file("tamper-proxy.json"))
        .merge(Yaml::file("tamper-proxy.yaml"))
        .merge(Yaml::file("tamper-proxy.yml"))
        .merge(Env::prefixed("TAMPER_PROXY_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

/// Loads configuration from one explicit file, picking the format from
/// its extension.
pub async fn load_from_path(path: &Path) -> Result<Config> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        other => {
            return Err(ConfigError::Parse(format!(
                "Unsupported config extension: {other:?}"
            ))
            .into())
        }
    };

    let config: Config = figment
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.engine.eval_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "Engine eval timeout must be greater than 0".into(),
        )
        .into());
    }

    if config.pipeline.max_source_bytes == 0 {
        return Err(ConfigError::Validation(
            "Max plugin source size must be greater than 0".into(),
        )
        .into());
    }

    if let StoreConfig::Sqlite { path } = &config.store {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("SQLite store path is empty".into()).into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.engine.eval_timeout_ms, 5000);
        assert!(matches!(config.store, StoreConfig::Memory));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.engine.eval_timeout_ms = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_sqlite_path_rejected() {
        let mut config = Config::default();
        config.store = StoreConfig::Sqlite {
            path: "".into(),
        };
        assert!(validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_from_toml_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "[engine]\nevalTimeoutMs = 250\n\n[store]\ntype = \"memory\"\n",
        )
        .unwrap();

        let config = load_from_path(&path).await.unwrap();
        assert_eq!(config.engine.eval_timeout_ms, 250);
    }
}
