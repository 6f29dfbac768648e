use crate::utils::error::{MonitorError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const BACKENDS: [&str; 2] = ["sysfs", "simulated"];
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub logging: Option<LoggingConfig>,
    pub hardware: Option<HardwareConfig>,
    pub actions: Option<ActionsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub backend: Option<String>,
    pub sysfs_root: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsConfig {
    pub enabled: Option<bool>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MonitorError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| MonitorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GPIO_ROOT})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| MonitorError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn backend(&self) -> Option<&str> {
        self.hardware.as_ref()?.backend.as_deref()
    }

    pub fn sysfs_root(&self) -> Option<&str> {
        self.hardware.as_ref()?.sysfs_root.as_deref()
    }

    pub fn poll_interval_ms(&self) -> Option<u64> {
        self.hardware.as_ref()?.poll_interval_ms
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref()?.level.as_deref()
    }

    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }

    /// 預設啟用外部腳本
    pub fn actions_enabled(&self) -> bool {
        self.actions.as_ref().and_then(|a| a.enabled).unwrap_or(true)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        if let Some(backend) = self.backend() {
            validation::validate_one_of("hardware.backend", backend, &BACKENDS)?;
        }
        if let Some(root) = self.sysfs_root() {
            validation::validate_absolute_path("hardware.sysfs_root", root)?;
        }
        if let Some(interval) = self.poll_interval_ms() {
            validation::validate_range("hardware.poll_interval_ms", interval, 1, 1000)?;
        }
        if let Some(level) = self.log_level() {
            validation::validate_one_of("logging.level", level, &LOG_LEVELS)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[logging]
level = "debug"
json = true

[hardware]
backend = "sysfs"
sysfs_root = "/sys/class/gpio"
poll_interval_ms = 10

[actions]
enabled = false
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.backend(), Some("sysfs"));
        assert_eq!(config.poll_interval_ms(), Some(10));
        assert_eq!(config.log_level(), Some("debug"));
        assert!(config.json_logs());
        assert!(!config.actions_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.backend(), None);
        assert!(config.actions_enabled());
        assert!(!config.json_logs());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BLM_TEST_GPIO_ROOT", "/tmp/fake-gpio");

        let config = TomlConfig::from_toml_str(
            r#"
[hardware]
sysfs_root = "${BLM_TEST_GPIO_ROOT}"
"#,
        )
        .unwrap();
        assert_eq!(config.sysfs_root(), Some("/tmp/fake-gpio"));

        std::env::remove_var("BLM_TEST_GPIO_ROOT");
    }

    #[test]
    fn test_config_validation() {
        let config = TomlConfig::from_toml_str(
            r#"
[hardware]
backend = "gpiod"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = TomlConfig::from_toml_str(
            r#"
[hardware]
poll_interval_ms = 0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        assert!(TomlConfig::from_toml_str("[hardware\nbackend = 1").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[hardware]\nbackend = \"simulated\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.backend(), Some("simulated"));
    }
}
