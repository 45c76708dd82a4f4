use crate::utils::error::{InsidersError, Result};
use crate::utils::process::{run, run_output};
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
}

#[derive(Debug, Deserialize)]
struct ProjectTable {
    name: String,
}

/// 本地儲存庫快取，每個儲存庫一個目錄
#[derive(Debug, Clone)]
pub struct GitCache {
    cache_dir: PathBuf,
}

impl GitCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn path(&self, repo: &str) -> PathBuf {
        self.cache_dir.join(repo)
    }

    async fn git(&self, repo: &str, args: &[&str]) -> Result<String> {
        run("git", self.git_args(repo, args), None).await
    }

    fn git_args(&self, repo: &str, args: &[&str]) -> Vec<OsString> {
        let mut full_args = vec![OsString::from("-C"), self.path(repo).into_os_string()];
        full_args.extend(args.iter().map(OsString::from));
        full_args
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn exists(&self, repo: &str) -> bool {
        self.path(repo).exists()
    }

    pub async fn clone(&self, name: &str, url: &str) -> Result<PathBuf> {
        let target = self.path(name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        run("git", [OsStr::new("clone"), OsStr::new(url), target.as_os_str()], None).await?;
        Ok(target)
    }

    pub async fn checkout(&self, repo: &str, reference: &str) -> Result<()> {
        self.git(repo, &["checkout", reference]).await.map(|_| ())
    }

    /// 重新切回 origin 的預設分支
    pub async fn checkout_origin_head(&self, repo: &str) -> Result<()> {
        self.git(repo, &["remote", "set-head", "origin", "--auto"]).await?;
        let reference = self
            .git(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await?;
        let branch = reference
            .trim()
            .strip_prefix("refs/remotes/origin/")
            .ok_or_else(|| {
                InsidersError::processing(format!(
                    "{}: unexpected origin HEAD reference '{}'",
                    repo, reference
                ))
            })?
            .to_string();
        self.checkout(repo, &branch).await
    }

    pub async fn pull(&self, repo: &str) -> Result<()> {
        self.git(repo, &["pull"]).await.map(|_| ())
    }

    pub fn dist_name(&self, repo: &str) -> Result<String> {
        let path = self.path(repo).join("pyproject.toml");
        let content = std::fs::read_to_string(&path)?;
        let pyproject: PyProject = toml::from_str(&content)?;
        pyproject
            .project
            .map(|p| p.name)
            .ok_or_else(|| {
                InsidersError::not_found(format!("[project].name in {}", path.display()))
            })
    }

    /// 沒有任何 tag 時回傳 None，其他 git 錯誤照常回報
    pub async fn latest_tag(&self, repo: &str) -> Result<Option<String>> {
        let output = run_output(
            "git",
            self.git_args(repo, &["describe", "--tags", "--abbrev=0"]),
            None,
        )
        .await?;
        if output.status.success() {
            let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((!tag.is_empty()).then_some(tag));
        }
        if self.git(repo, &["tag", "--list"]).await?.is_empty() {
            return Ok(None);
        }
        Err(InsidersError::CommandError {
            program: "git".to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    pub fn remove(&self, repo: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.path(repo)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn remove_dist(&self, repo: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.path(repo).join("dist")) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// 用建置指令產生 sdist 與 wheel，回傳產出的檔案
    pub async fn build(&self, repo: &str, build_command: &[String]) -> Result<Vec<PathBuf>> {
        let repo_path = self.path(repo);
        build_distributions(&repo_path, build_command).await
    }
}

pub async fn build_distributions(
    project_dir: &Path,
    build_command: &[String],
) -> Result<Vec<PathBuf>> {
    let (program, args) = build_command
        .split_first()
        .ok_or_else(|| InsidersError::config("index.build-command cannot be empty"))?;
    let dist_dir = project_dir.join("dist");
    let mut full_args: Vec<OsString> = args.iter().map(OsString::from).collect();
    full_args.push(OsString::from("--outdir"));
    full_args.push(dist_dir.clone().into_os_string());
    full_args.push(project_dir.as_os_str().to_os_string());
    run(program, &full_args, Some(project_dir)).await?;

    let mut dists = Vec::new();
    for entry in std::fs::read_dir(&dist_dir)? {
        let path = entry?.path();
        if path.is_file() {
            dists.push(path);
        }
    }
    dists.sort();
    Ok(dists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dist_name_and_list() {
        let temp = TempDir::new().unwrap();
        let cache = GitCache::new(temp.path()).unwrap();
        std::fs::create_dir_all(cache.path("mkdocs-ultimate")).unwrap();
        std::fs::write(
            cache.path("mkdocs-ultimate").join("pyproject.toml"),
            "[project]\nname = \"mkdocs-ultimate\"\nversion = \"1.0\"\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("stray-file"), "").unwrap();

        assert_eq!(cache.list().unwrap(), vec!["mkdocs-ultimate".to_string()]);
        assert!(cache.exists("mkdocs-ultimate"));
        assert_eq!(cache.dist_name("mkdocs-ultimate").unwrap(), "mkdocs-ultimate");

        cache.remove("mkdocs-ultimate").unwrap();
        assert!(!cache.exists("mkdocs-ultimate"));
        cache.remove("mkdocs-ultimate").unwrap();
    }

    #[test]
    fn test_dist_name_missing_project_table() {
        let temp = TempDir::new().unwrap();
        let cache = GitCache::new(temp.path()).unwrap();
        std::fs::create_dir_all(cache.path("repo")).unwrap();
        std::fs::write(cache.path("repo").join("pyproject.toml"), "[tool.pdm]\n").unwrap();
        assert!(matches!(
            cache.dist_name("repo"),
            Err(InsidersError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    async fn init_repo(cache: &GitCache, repo: &str) {
        let path = cache.path(repo);
        std::fs::create_dir_all(&path).unwrap();
        run("git", [OsStr::new("init"), path.as_os_str()], None)
            .await
            .unwrap();
        std::fs::write(path.join("README.md"), "readme").unwrap();
        cache.git(repo, &["add", "README.md"]).await.unwrap();
        cache
            .git(
                repo,
                &[
                    "-c",
                    "user.name=Insiders",
                    "-c",
                    "user.email=insiders@example.com",
                    "-c",
                    "commit.gpgsign=false",
                    "commit",
                    "-m",
                    "init",
                ],
            )
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_latest_tag() {
        let temp = TempDir::new().unwrap();
        let cache = GitCache::new(temp.path().join("repos with spaces")).unwrap();
        init_repo(&cache, "project").await;
        assert_eq!(cache.latest_tag("project").await.unwrap(), None);

        cache.git("project", &["tag", "1.2.0"]).await.unwrap();
        assert_eq!(
            cache.latest_tag("project").await.unwrap().as_deref(),
            Some("1.2.0")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_latest_tag_outside_repository_fails() {
        let temp = TempDir::new().unwrap();
        let cache = GitCache::new(temp.path()).unwrap();
        std::fs::create_dir_all(cache.path("plain-dir")).unwrap();
        assert!(matches!(
            cache.latest_tag("plain-dir").await,
            Err(InsidersError::CommandError { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_build_distributions_in_non_utf8_path() {
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let project = temp.path().join(OsStr::from_bytes(b"proj-\xff"));
        std::fs::create_dir_all(&project).unwrap();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "mkdir -p \"$2\" && touch \"$2\"/pkg-1.0.tar.gz".to_string(),
            "build".to_string(),
        ];
        let dists = build_distributions(&project, &command).await.unwrap();
        assert_eq!(dists, vec![project.join("dist").join("pkg-1.0.tar.gz")]);
    }
}
