use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsidersError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration value: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{service} API error: {message}")]
    ApiError { service: String, message: String },

    #[error("Command `{program}` failed with exit code {code:?}: {stderr}")]
    CommandError {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Not supported: {feature}")]
    Unsupported { feature: String },

    #[error("Processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    FileSystem,
    External,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl InsidersError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn api(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::ApiError { .. } => ErrorCategory::Network,
            Self::IoError(_) | Self::NotFound { .. } => ErrorCategory::FileSystem,
            Self::TomlError(_)
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::CommandError { .. } | Self::Unsupported { .. } => ErrorCategory::External,
            Self::SerializationError(_) | Self::ProcessingError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unsupported { .. } => ErrorSeverity::Low,
            Self::HttpError(_) | Self::ApiError { .. } => ErrorSeverity::Medium,
            Self::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::HttpError(e) if e.is_status() => {
                "Check that your token is valid and has the required scopes".to_string()
            }
            Self::HttpError(_) => "Check your network connection and retry".to_string(),
            Self::ApiError { service, .. } => {
                format!("Check your {} token scopes and retry", service)
            }
            Self::IoError(_) => "Check file permissions and available disk space".to_string(),
            Self::SerializationError(_) => {
                "The remote service returned unexpected data, retry later".to_string()
            }
            Self::TomlError(_) | Self::ConfigError { .. } => {
                "Fix the configuration file (see `insiders --debug-info` for its path)".to_string()
            }
            Self::MissingConfigError { field } => format!(
                "Pass the corresponding command-line option or set `{}` in the configuration file",
                field
            ),
            Self::InvalidConfigValueError { field, .. } => {
                format!("Provide a valid value for `{}`", field)
            }
            Self::CommandError { program, .. } => {
                format!("Make sure `{}` is installed and works from your shell", program)
            }
            Self::NotFound { .. } => "Check the name or path and retry".to_string(),
            Self::Unsupported { .. } => "This feature is not available yet".to_string(),
            Self::ProcessingError { .. } => "Run again with `-L DEBUG` for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Network => format!("Could not talk to a remote service: {}", self),
            ErrorCategory::FileSystem => format!("File system problem: {}", self),
            ErrorCategory::External => format!("External tool problem: {}", self),
            ErrorCategory::Data => format!("Unexpected data: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, InsidersError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let error = InsidersError::MissingConfigError {
            field: "github.token-command".to_string(),
        };
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert_eq!(error.severity(), ErrorSeverity::High);
        assert!(error.recovery_suggestion().contains("github.token-command"));

        let error = InsidersError::Unsupported {
            feature: "Polar sponsors".to_string(),
        };
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert!(error.user_friendly_message().starts_with("External tool problem"));
    }
}
