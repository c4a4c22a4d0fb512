use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;

const DATA_DIR: &str = ".maternal_gateway";
const CONFIG_FILE: &str = "gateway_config.json";

/// Get data directory path, creating it on first use
pub fn get_data_dir() -> AppResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AppError::Config("Failed to get user home directory".to_string()))?;
    let data_dir = home.join(DATA_DIR);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

/// The config file as stored plus the effective config with environment
/// overrides. Only `file` is ever written back, so secrets from the
/// environment never reach disk.
#[derive(Debug, Clone)]
pub struct ConfigLayers {
    pub file: AppConfig,
    pub effective: AppConfig,
}

impl ConfigLayers {
    pub fn new<F>(file: AppConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut effective = file.clone();
        effective.apply_env_overrides(lookup);
        Self { file, effective }
    }

    /// A port given on the command line lands in both layers
    pub fn set_port(&mut self, port: u16) {
        self.file.gateway.port = port;
        self.effective.gateway.port = port;
    }
}

/// Load application config: config file (if any), then environment overrides
pub fn load_config_layers() -> AppResult<ConfigLayers> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);
    let file = load_app_config_from(&config_path)?;
    Ok(ConfigLayers::new(file, |key| std::env::var(key).ok()))
}

/// Load config from an explicit file. A missing file yields defaults.
pub fn load_app_config_from(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
}

/// Save application config
pub fn save_app_config(config: &AppConfig) -> AppResult<PathBuf> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);
    save_app_config_to(&config_path, config)?;
    Ok(config_path)
}

pub fn save_app_config_to(path: &Path, config: &AppConfig) -> AppResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("maternal-gateway-does-not-exist.json");
        let config = load_app_config_from(&path).unwrap();
        assert_eq!(config.gateway.port, 3001);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let path = std::env::temp_dir().join(format!(
            "maternal-gateway-bad-{}.json",
            std::process::id()
        ));
        fs::write(&path, "{ not json").unwrap();
        let result = load_app_config_from(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_saved_file_layer_keeps_env_secrets_out() {
        let path = std::env::temp_dir().join(format!(
            "maternal-gateway-save-{}.json",
            std::process::id()
        ));
        let mut file = AppConfig::new();
        file.gateway.username = Some("clerk".to_string());
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let mut layers = ConfigLayers::new(load_app_config_from(&path).unwrap(), |key| match key {
            "OPENMRS_PASSWORD" => Some("env-openmrs-secret".to_string()),
            "LLM_API_KEY" => Some("env-llm-secret".to_string()),
            _ => None,
        });
        layers.set_port(4000);
        assert_eq!(layers.effective.gateway.password.as_deref(), Some("env-openmrs-secret"));
        assert_eq!(layers.effective.advisory.api_key.as_deref(), Some("env-llm-secret"));

        save_app_config_to(&path, &layers.file).unwrap();
        let saved = fs::read_to_string(&path).unwrap();
        let reloaded = load_app_config_from(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert!(!saved.contains("env-openmrs-secret"));
        assert!(!saved.contains("env-llm-secret"));
        assert_eq!(reloaded.gateway.port, 4000);
        assert_eq!(reloaded.gateway.username.as_deref(), Some("clerk"));
    }
}
