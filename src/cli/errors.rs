//! CLI-specific error types
//!
//! All CLI errors are fatal to the process.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("VTN_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    #[error("VTN_CLI_IO_ERROR: {0}")]
    Io(String),

    #[error("VTN_CLI_BOOT_FAILED: {0}")]
    BootFailed(String),
}

impl CliError {
    const CONFIG: &'static str = "VTN_CLI_CONFIG_ERROR";
    const IO: &'static str = "VTN_CLI_IO_ERROR";
    const BOOT: &'static str = "VTN_CLI_BOOT_FAILED";

    pub fn config_error(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        CliError::Io(msg.into())
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        CliError::BootFailed(msg.into())
    }

    /// Stable error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => Self::CONFIG,
            CliError::Io(_) => Self::IO,
            CliError::BootFailed(_) => Self::BOOT,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CliError::Config(m) | CliError::Io(m) | CliError::BootFailed(m) => m,
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::config_error("data_dir is required");
        assert_eq!(err.code_str(), "VTN_CLI_CONFIG_ERROR");
        assert_eq!(err.message(), "data_dir is required");
        assert_eq!(err.to_string(), "VTN_CLI_CONFIG_ERROR: data_dir is required");
    }

    #[test]
    fn test_conversions() {
        let io_err: CliError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(io_err.code_str(), "VTN_CLI_IO_ERROR");

        let json_err: CliError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(json_err.message().starts_with("JSON error"));
    }
}
