pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{ProcessLauncher, RecordingLauncher, SimulatedBoard, SysfsGpio};
pub use config::{toml_config::TomlConfig, Backend, Settings};
pub use core::{
    dispatcher::EventDispatcher,
    edge_hub::EdgeHub,
    lifecycle::{Lifecycle, StatusSnapshot, TeardownReport},
    registry::LineRegistry,
};
pub use domain::model::BoardTable;
pub use utils::error::{MonitorError, Result};
