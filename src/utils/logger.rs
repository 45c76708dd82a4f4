use crate::utils::error::{InsidersError, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 使用者可見的日誌等級
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[cfg_attr(feature = "cli", value(rename_all = "UPPER"))]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// SUCCESS 沒有對應的 tracing 等級，視為 INFO；CRITICAL 視為 ERROR
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Success => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    pub fn filter_directives(&self) -> String {
        let level = self.as_directive();
        format!("warn,insiders={level},tower_http={level}")
    }
}

impl FromStr for LogLevel {
    type Err = InsidersError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "SUCCESS" => Ok(LogLevel::Success),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(InsidersError::InvalidConfigValueError {
                field: "log-level".to_string(),
                value: other.to_string(),
                reason: "Expected one of TRACE, DEBUG, INFO, SUCCESS, WARNING, ERROR, CRITICAL"
                    .to_string(),
            }),
        }
    }
}

pub fn init_cli_logger(level: LogLevel, log_path: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directives()));

    let (stderr_layer, file_layer) = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact();
            (Some(layer), None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| InsidersError::config(format!("Failed to initialize logging: {}", e)))
}

/// 逐行記錄外部程式的輸出
pub fn log_captured(text: &str, pkg: &str) {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        tracing::debug!(pkg, "{}", line);
    }
}
