use crate::utils::error::{InsidersError, Result};
use crate::utils::logger::log_captured;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

fn program_name(program: &OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

/// 執行子程序並回傳原始輸出，不檢查結束碼
pub async fn run_output<I, S>(program: &str, args: I, cwd: Option<&Path>) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    tracing::debug!("Running subprocess: {} {:?}", program, args);

    let mut command = Command::new(program);
    command.args(&args).kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            InsidersError::CommandError {
                program: program.to_string(),
                code: None,
                stderr: "program not found".to_string(),
            }
        } else {
            InsidersError::IoError(e)
        }
    })?;

    let pkg = program_name(OsStr::new(program));
    log_captured(&String::from_utf8_lossy(&output.stdout), &pkg);
    log_captured(&String::from_utf8_lossy(&output.stderr), &pkg);
    Ok(output)
}

/// 執行子程序，失敗時回傳 `CommandError`，成功時回傳標準輸出
pub async fn run<I, S>(program: &str, args: I, cwd: Option<&Path>) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_output(program, args, cwd).await?;
    if !output.status.success() {
        return Err(InsidersError::CommandError {
            program: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// 透過 shell 執行指令並取得去除空白的輸出（用於 token-command）
pub async fn shell_output(command_line: &str) -> Result<String> {
    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");
    #[cfg(not(windows))]
    let (shell, flag) = ("sh", "-c");

    run(shell, [flag, command_line], None).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_trimmed_stdout() {
        let out = run("echo", ["  hello  "], None).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let err = run("sh", ["-c", "echo oops >&2; exit 3"], None)
            .await
            .unwrap_err();
        match err {
            InsidersError::CommandError { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_shell_output() {
        assert_eq!(shell_output("printf 'tok-123\\n'").await.unwrap(), "tok-123");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run("definitely-not-a-real-program-xyz", ["--help"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, InsidersError::CommandError { code: None, .. }));
    }
}
