use crate::domain::model::{ChannelId, LineId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid configuration for {line}: {reason}")]
    InvalidConfiguration { line: LineId, reason: String },

    #[error("Invalid board table: {message}")]
    InvalidTable { message: String },

    #[error("{line} is not a valid line on this host")]
    InvalidLine { line: LineId },

    #[error("{line} is already acquired")]
    AlreadyAcquired { line: LineId },

    #[error("{line} is not acquired")]
    NotAcquired { line: LineId },

    #[error("Failed to acquire {line}: {message}")]
    AcquisitionFailure { line: LineId, message: String },

    #[error("Failed to subscribe to edges on {line}: {message}")]
    SubscriptionFailure { line: LineId, message: String },

    #[error("No mapping for button {channel}")]
    UnknownChannel { channel: ChannelId },

    #[error("Failed to launch {path}: {message}")]
    ActionLaunchFailure { path: String, message: String },

    #[error("Failed to release {line}: {message}")]
    ReleaseFailure { line: LineId, message: String },

    #[error("Line I/O failed on {line}: {message}")]
    LineIo { line: LineId, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Logged, the current step is skipped.
    Low,
    /// Logged, the operation continues with the remaining steps.
    Medium,
    /// Stops setup; rollback has already run.
    High,
    /// Stops the process before any hardware is touched.
    Critical,
}

impl MonitorError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MonitorError::UnknownChannel { .. } | MonitorError::NotAcquired { .. } => {
                ErrorSeverity::Low
            }
            MonitorError::ActionLaunchFailure { .. }
            | MonitorError::ReleaseFailure { .. }
            | MonitorError::LineIo { .. } => ErrorSeverity::Medium,
            MonitorError::InvalidLine { .. }
            | MonitorError::AlreadyAcquired { .. }
            | MonitorError::AcquisitionFailure { .. }
            | MonitorError::SubscriptionFailure { .. }
            | MonitorError::IoError(_) => ErrorSeverity::High,
            MonitorError::InvalidConfiguration { .. }
            | MonitorError::InvalidTable { .. }
            | MonitorError::ConfigError { .. }
            | MonitorError::ConfigValidationError { .. }
            | MonitorError::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
        }
    }

    /// True for errors that abort setup.
    pub fn is_fatal(&self) -> bool {
        self.severity() >= ErrorSeverity::High
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MonitorError::InvalidConfiguration { .. } | MonitorError::InvalidLine { .. } => {
                "Check that the GPIO numbers exist on this board (see /sys/class/gpio/gpiochip*)"
            }
            MonitorError::InvalidTable { .. } => "Fix the compiled board table",
            MonitorError::AlreadyAcquired { .. } | MonitorError::AcquisitionFailure { .. } => {
                "Make sure no other process has exported the line, or unexport it first"
            }
            MonitorError::SubscriptionFailure { .. } => {
                "Check that the line supports edge detection"
            }
            MonitorError::ActionLaunchFailure { .. } => {
                "Check that the script and its interpreter exist and are executable"
            }
            MonitorError::ReleaseFailure { .. } | MonitorError::LineIo { .. } => {
                "Check permissions on the GPIO sysfs files"
            }
            MonitorError::IoError(_) => "Check file permissions and paths",
            MonitorError::NotAcquired { .. } | MonitorError::UnknownChannel { .. } => {
                "No action required"
            }
            MonitorError::ConfigError { .. }
            | MonitorError::ConfigValidationError { .. }
            | MonitorError::InvalidConfigValueError { .. } => {
                "Review the configuration file and command line flags"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
