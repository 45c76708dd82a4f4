//! Public and insiders project pairs.

use crate::adapters::github::GitHub;
use crate::adapters::pypi::reserve_pypi;
use crate::utils::error::Result;
use crate::utils::process::{run, run_output};
use std::path::{Path, PathBuf};

const CI_WORKFLOW: &str = r#"name: ci

on:
  push:
  pull_request:

jobs:
  ci:
    runs-on: ubuntu-latest
    steps:
      - run: "true"
"#;

#[derive(Debug, Clone)]
pub struct ProjectLocation {
    pub namespace: String,
    pub name: String,
    pub path: PathBuf,
}

impl ProjectLocation {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub public: ProjectLocation,
    pub insiders: ProjectLocation,
    pub description: String,
    /// PyPI 帳號，預設為公開專案的命名空間
    pub username: Option<String>,
    pub copier_template: Option<String>,
    pub register_pypi: bool,
}

async fn git(repo: &Path, args: &[&str]) -> Result<String> {
    let repo = repo.to_string_lossy();
    let mut full = vec!["-C", &*repo];
    full.extend_from_slice(args);
    run("git", &full, None).await
}

async fn clone_into(location: &ProjectLocation) -> Result<()> {
    if let Some(parent) = location.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = location.clone_url();
    let target = location.path.to_string_lossy();
    run("git", ["clone", url.as_str(), &*target], None).await?;
    Ok(())
}

async fn commit_and_push(repo: &Path, message: &str) -> Result<()> {
    git(repo, &["add", "-A"]).await?;
    git(repo, &["commit", "-m", message]).await?;
    git(repo, &["push", "-u", "origin", "HEAD"]).await?;
    Ok(())
}

/// 公開儲存庫的初始內容：README 與永遠通過的 CI
pub fn seed_public_repository(repo: &Path, name: &str, description: &str) -> Result<()> {
    std::fs::write(repo.join("README.md"), format!("# {}\n\n{}\n", name, description))?;
    let workflows = repo.join(".github").join("workflows");
    std::fs::create_dir_all(&workflows)?;
    std::fs::write(workflows.join("ci.yml"), CI_WORKFLOW)?;
    Ok(())
}

pub async fn create_project(
    github: &GitHub,
    project: &NewProject,
    build_command: &[String],
) -> Result<()> {
    let public = &project.public;
    let insiders = &project.insiders;

    tracing::info!("Creating public repository {}", public.slug());
    github
        .create_repository(&public.namespace, &public.name, &project.description, false)
        .await?;
    tracing::info!("Creating insiders repository {}", insiders.slug());
    github
        .create_repository(&insiders.namespace, &insiders.name, &project.description, true)
        .await?;

    clone_into(public).await?;
    seed_public_repository(&public.path, &public.name, &project.description)?;
    commit_and_push(&public.path, "chore: Initial commit").await?;

    clone_into(insiders).await?;
    if let Some(template) = &project.copier_template {
        let target = insiders.path.to_string_lossy();
        run(
            "copier",
            ["copy", "--trust", template.as_str(), &*target],
            None,
        )
        .await?;
        commit_and_push(&insiders.path, "feat: Generate project with Copier template").await?;
    }

    if project.register_pypi {
        let username = project.username.as_deref().unwrap_or(&public.namespace);
        reserve_pypi(username, &public.name, &project.description, build_command).await?;
    }
    tracing::info!("✅ Project {} created", public.slug());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    pub subject: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckFinding {
    fn new(subject: impl Into<String>, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ok,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for CheckFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.ok { "✅" } else { "❌" };
        write!(f, "{} {}: {}", mark, self.subject, self.detail)
    }
}

/// 遠端網址是否指向 `namespace/name`（https 或 ssh 形式皆可）
pub fn remote_matches(remote: &str, namespace: &str, name: &str) -> bool {
    let remote = remote.trim().trim_end_matches('/');
    let remote = remote.strip_suffix(".git").unwrap_or(remote);
    let slug = format!("{}/{}", namespace, name).to_lowercase();
    let remote = remote.to_lowercase();
    remote.ends_with(&format!("/{}", slug)) || remote.ends_with(&format!(":{}", slug))
}

async fn check_local(location: &ProjectLocation) -> Result<CheckFinding> {
    let subject = format!("local clone {}", location.path.display());
    if !location.path.join(".git").exists() {
        return Ok(CheckFinding::new(subject, false, "not a Git repository"));
    }
    let repo = location.path.to_string_lossy();
    let output = run_output("git", ["-C", &*repo, "remote", "get-url", "origin"], None).await?;
    if !output.status.success() {
        return Ok(CheckFinding::new(subject, false, "no origin remote"));
    }
    let remote = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if remote_matches(&remote, &location.namespace, &location.name) {
        Ok(CheckFinding::new(subject, true, format!("origin is {}", remote)))
    } else {
        Ok(CheckFinding::new(
            subject,
            false,
            format!("origin is {}, expected {}", remote, location.slug()),
        ))
    }
}

pub async fn check_project(github: &GitHub, project: &NewProject) -> Result<Vec<CheckFinding>> {
    let mut findings = Vec::new();
    for location in [&project.public, &project.insiders] {
        let exists = github
            .repository_exists(&location.namespace, &location.name)
            .await?;
        findings.push(CheckFinding::new(
            format!("GitHub repository {}", location.slug()),
            exists,
            if exists { "exists" } else { "missing" },
        ));
        findings.push(check_local(location).await?);
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_matches() {
        assert!(remote_matches("https://github.com/pawamoy/insiders.git", "pawamoy", "insiders"));
        assert!(remote_matches("git@github.com:Pawamoy/Insiders.git\n", "pawamoy", "insiders"));
        assert!(!remote_matches(
            "https://github.com/pawamoy/insiders-project",
            "pawamoy",
            "insiders"
        ));
        assert!(!remote_matches("https://github.com/other/insiders", "pawamoy", "insiders"));
    }

    #[test]
    fn test_seed_public_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        seed_public_repository(temp.path(), "proj", "A project").unwrap();
        let readme = std::fs::read_to_string(temp.path().join("README.md")).unwrap();
        assert_eq!(readme, "# proj\n\nA project\n");
        let ci = std::fs::read_to_string(temp.path().join(".github/workflows/ci.yml")).unwrap();
        assert!(ci.contains("run: \"true\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_local_without_git() {
        let temp = tempfile::TempDir::new().unwrap();
        let location = ProjectLocation {
            namespace: "ns".to_string(),
            name: "proj".to_string(),
            path: temp.path().join("missing"),
        };
        let finding = check_local(&location).await.unwrap();
        assert!(!finding.ok);
        assert!(finding.to_string().starts_with("❌"));
    }
}
