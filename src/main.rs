use anyhow::Context as _;
use clap::Parser;
use insiders::app::{self, Context};
use insiders::config::cli::{Command, IndexCommand};
use insiders::utils::error::ErrorSeverity;
use insiders::utils::logger::{self, LogLevel};
use insiders::utils::validation::Validate;
use insiders::{Cli, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug_info {
        println!("{}", app::debug_info(cli.config.as_deref()));
        return Ok(());
    }

    // 載入並驗證設定檔
    let config = match Config::load(cli.config.as_deref()).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // 伺服器程序可從設定檔取得日誌等級與路徑
    let starts_server = matches!(cli.command, Some(Command::Index(IndexCommand::Start { .. })));
    let log_level = match cli.log_level {
        Some(level) => level,
        None if starts_server => config.index_log_level()?.unwrap_or_default(),
        None => LogLevel::default(),
    };
    let log_path = cli
        .log_path
        .clone()
        .or_else(|| starts_server.then(|| config.index.log_path.clone()).flatten());

    logger::init_cli_logger(log_level, log_path.as_deref())
        .context("Failed to initialize logging")?;
    tracing::debug!("Configuration: {:?}", config.path);

    let ctx = Context {
        config_path: cli.config.clone().or_else(|| config.path.clone()),
        config,
        log_level,
        log_path,
    };

    match app::run(cli, ctx).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 依錯誤嚴重程度決定結束碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
    }
}
