pub mod toml_config;

use crate::adapters::sysfs::{DEFAULT_POLL_INTERVAL, DEFAULT_SYSFS_ROOT};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use std::path::PathBuf;
use std::time::Duration;
use toml_config::TomlConfig;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "button-led-monitor")]
#[command(about = "Watches push buttons, drives LEDs and runs a script per press")]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Use the in-memory board instead of real GPIO")]
    pub simulate: bool,

    #[arg(long)]
    pub sysfs_root: Option<String>,

    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, help = "Log actions instead of launching scripts")]
    pub no_actions: bool,

    #[arg(long, help = "Validate configuration and board table, then exit")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sysfs,
    Simulated,
}

/// Effective settings after merging the config file and the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: Backend,
    pub sysfs_root: PathBuf,
    pub poll_interval: Duration,
    pub actions_enabled: bool,
    pub log_level: Option<String>,
    pub json_logs: bool,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::Sysfs,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            actions_enabled: true,
            log_level: None,
            json_logs: false,
            verbose: false,
        }
    }
}

impl Settings {
    pub fn from_file(file: &TomlConfig) -> Self {
        let defaults = Self::default();
        Self {
            backend: match file.backend() {
                Some("simulated") => Backend::Simulated,
                _ => Backend::Sysfs,
            },
            sysfs_root: file
                .sysfs_root()
                .map(PathBuf::from)
                .unwrap_or(defaults.sysfs_root),
            poll_interval: file
                .poll_interval_ms()
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            actions_enabled: file.actions_enabled(),
            log_level: file.log_level().map(str::to_string),
            json_logs: file.json_logs(),
            verbose: false,
        }
    }

    /// 命令列參數優先於設定檔
    #[cfg(feature = "cli")]
    pub fn resolve(file: Option<&TomlConfig>, cli: &CliConfig) -> Self {
        let mut settings = file.map(Self::from_file).unwrap_or_default();
        if cli.simulate {
            settings.backend = Backend::Simulated;
        }
        if let Some(root) = &cli.sysfs_root {
            settings.sysfs_root = PathBuf::from(root);
        }
        if let Some(ms) = cli.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if cli.no_actions {
            settings.actions_enabled = false;
        }
        settings.json_logs |= cli.json_logs;
        settings.verbose = cli.verbose;
        settings
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        let root = self.sysfs_root.to_string_lossy();
        validation::validate_absolute_path("hardware.sysfs_root", &root)?;
        validation::validate_range(
            "hardware.poll_interval_ms",
            self.poll_interval.as_millis() as u64,
            1,
            1000,
        )?;
        if let Some(level) = &self.log_level {
            validation::validate_one_of("logging.level", level, &toml_config::LOG_LEVELS)?;
        }
        Ok(())
    }
}
