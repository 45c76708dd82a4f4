//! The local index: cached clones, built distributions and the server process.

use crate::adapters::git::GitCache;
use crate::adapters::http::{check_response, plain_client};
use crate::adapters::index_server;
use crate::core::distribution::{normalize_name, DistFile, DistKind};
use crate::core::version::{normalize_tag, PyVersion};
use crate::utils::error::{InsidersError, Result};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use url::Url;

/// 索引伺服器行程的資訊
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub cmdline: Vec<String>,
    pub create_time: u64,
    pub username: Option<String>,
}

/// `index add` 的參數：`URL_OR_NAMESPACE/PROJECT[:NAME]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    pub url: String,
    pub name: String,
}

impl RepositorySpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (location, name) = match spec.rsplit_once(':') {
            Some((location, name)) if !name.contains('/') && !name.is_empty() => {
                (location, Some(name.to_string()))
            }
            _ => (spec, None),
        };

        let url = if location.contains("://") || location.starts_with("git@") {
            location.to_string()
        } else {
            let mut parts = location.split('/');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(ns), Some(project), None) if !ns.is_empty() && !project.is_empty() => {
                    format!("https://github.com/{}/{}.git", ns, project)
                }
                _ => {
                    return Err(InsidersError::InvalidConfigValueError {
                        field: "repository".to_string(),
                        value: spec.to_string(),
                        reason: "Expected URL_OR_NAMESPACE/PROJECT[:NAME]".to_string(),
                    })
                }
            }
        };

        let name = match name {
            Some(name) => name,
            None => url
                .trim_end_matches('/')
                .rsplit(['/', ':'])
                .next()
                .unwrap_or_default()
                .trim_end_matches(".git")
                .to_string(),
        };
        if name.is_empty() {
            return Err(InsidersError::InvalidConfigValueError {
                field: "repository".to_string(),
                value: spec.to_string(),
                reason: "Cannot infer a repository name".to_string(),
            });
        }
        Ok(Self { url, name })
    }
}

pub struct Index {
    url: String,
    dist_dir: PathBuf,
    git: GitCache,
    client: Client,
    build_command: Vec<String>,
}

impl Index {
    pub fn new(
        url: &str,
        git_dir: impl Into<PathBuf>,
        dist_dir: impl Into<PathBuf>,
        build_command: Vec<String>,
    ) -> Result<Self> {
        let dist_dir = dist_dir.into();
        std::fs::create_dir_all(&dist_dir)?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            dist_dir,
            git: GitCache::new(git_dir)?,
            client: plain_client()?,
            build_command,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    pub fn port(&self) -> Result<u16> {
        let parsed = Url::parse(&self.url).map_err(|e| InsidersError::InvalidConfigValueError {
            field: "index.url".to_string(),
            value: self.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(parsed.port_or_known_default().unwrap_or(80))
    }

    /// 尚未快取的儲存庫：複製、切到最新 tag、建置並上傳
    pub async fn add(&self, spec: &RepositorySpec) -> Result<()> {
        if self.git.exists(&spec.name) {
            tracing::info!("{}: Already watched, skipping", spec.name);
            return Ok(());
        }
        self.git.clone(&spec.name, &spec.url).await?;
        let tag = self.git.latest_tag(&spec.name).await?.ok_or_else(|| {
            InsidersError::not_found(format!("{}: no tag to build", spec.name))
        })?;
        self.git.checkout(&spec.name, &tag).await?;
        let dists = self.git.build(&spec.name, &self.build_command).await?;
        self.upload(&dists).await?;
        tracing::info!("✅ {}: Added at version {}", spec.name, normalize_tag(&tag));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let project = normalize_name(&self.git.dist_name(name)?);
        self.git.remove(name)?;
        for dist in self.distributions()? {
            if dist.project == project {
                std::fs::remove_file(self.dist_dir.join(&dist.filename))?;
                tracing::debug!("Removed {}", dist.filename);
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dist_dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn distributions(&self) -> Result<Vec<DistFile>> {
        Ok(self
            .list()?
            .iter()
            .filter_map(|p| p.file_name())
            .filter_map(|f| DistFile::parse(&f.to_string_lossy()))
            .collect())
    }

    /// 更新所有（或指定的）快取儲存庫，最新 tag 不在索引上就建置上傳
    pub async fn update(&self, projects: &[String]) -> Result<()> {
        let projects = if projects.is_empty() {
            self.git.list()?
        } else {
            projects.to_vec()
        };

        for name in &projects {
            if !self.git.exists(name) {
                tracing::warn!("{}: Repository not found, skipping", name);
                continue;
            }
            let dist_name = self.git.dist_name(name)?;
            tracing::info!("{}: Updating sources", name);
            self.git.checkout_origin_head(name).await?;
            self.git.pull(name).await?;

            let Some(latest_tag) = self.git.latest_tag(name).await? else {
                tracing::debug!("{}: No tags found", name);
                continue;
            };
            tracing::debug!("{}: Latest tag is {}", name, latest_tag);

            let latest_version = self.latest(&dist_name).await?;
            if let Some(version) = &latest_version {
                tracing::debug!("{}: Latest index version is {}", name, version);
            }

            let normal_tag = normalize_tag(&latest_tag);
            let normal_version = normalize_tag(latest_version.as_deref().unwrap_or("0.0.0"));
            if latest_version.is_some() && normal_tag == normal_version {
                continue;
            }

            if let (Some(tag), Some(current)) =
                (PyVersion::parse(&normal_tag), PyVersion::parse(&normal_version))
            {
                if tag < current {
                    tracing::warn!(
                        "Latest tag {} is older than latest index version {}",
                        latest_tag,
                        latest_version.as_deref().unwrap_or_default()
                    );
                    if self.exists(&dist_name, &normal_tag).await? {
                        continue;
                    }
                }
            }

            tracing::info!(
                "{}: Building and uploading {} (current: {})",
                name,
                normal_tag,
                normal_version
            );
            self.git.remove_dist(name)?;
            self.git.checkout(name, &latest_tag).await?;
            let dists = self.git.build(name, &self.build_command).await?;
            self.upload(&dists).await?;
            tracing::info!("✅ {}: Built and published version {}", name, normal_tag);
        }
        Ok(())
    }

    /// 索引上某專案的所有版本
    async fn versions(&self, name: &str) -> Result<Vec<String>> {
        let project = normalize_name(name);
        let response = self
            .client
            .get(format!("{}/simple/{}/", self.url, project))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let html = check_response("index", response).await?.text().await?;
        Ok(parse_links(&html)
            .into_iter()
            .filter_map(|f| DistFile::parse(&f))
            .filter(|d| d.project == project)
            .map(|d| d.version)
            .collect())
    }

    pub async fn latest(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .versions(name)
            .await?
            .iter()
            .filter_map(|v| PyVersion::parse(v))
            .max()
            .map(|v| v.to_string()))
    }

    pub async fn exists(&self, name: &str, version: &str) -> Result<bool> {
        let wanted = PyVersion::parse(version);
        Ok(self.versions(name).await?.iter().any(|v| match &wanted {
            Some(wanted) => PyVersion::parse(v).is_some_and(|v| &v == wanted),
            None => v == version,
        }))
    }

    /// 逐一上傳，索引已有的檔案（409）直接略過
    pub async fn upload(&self, files: &[PathBuf]) -> Result<()> {
        for path in files {
            let filename = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dist = DistFile::parse(&filename).ok_or_else(|| {
                InsidersError::processing(format!("Not a distribution file: {}", path.display()))
            })?;
            let bytes = tokio::fs::read(path).await?;
            let form = Form::new()
                .text(":action", "file_upload")
                .text("protocol_version", "1")
                .text("name", dist.project.clone())
                .text("version", dist.version.clone())
                .text(
                    "filetype",
                    match dist.kind {
                        DistKind::Sdist => "sdist",
                        DistKind::Wheel => "bdist_wheel",
                    },
                )
                .part("content", Part::bytes(bytes).file_name(filename.clone()));

            let response = self
                .client
                .post(format!("{}/", self.url))
                .multipart(form)
                .send()
                .await?;
            if response.status() == StatusCode::CONFLICT {
                tracing::info!("{} already exists on the index, skipping", filename);
                continue;
            }
            check_response("index", response).await?;
            tracing::debug!("Uploaded {}", filename);
        }
        Ok(())
    }

    /// 前景執行，直到收到 Ctrl-C
    pub async fn serve(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port()?)).await?;
        index_server::serve(listener, self.dist_dir.clone(), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }
}

/// 以分離的子行程重新執行本程式，回傳 PID
pub fn spawn_background(args: &[OsString]) -> Result<u32> {
    let exe = std::env::current_exe()?;
    let mut command = std::process::Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let child = command.spawn()?;
    tracing::info!("Index server started in the background (PID {})", child.id());
    Ok(child.id())
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href="([^"]+)""#).expect("valid href regex"))
}

/// 從 simple API 頁面取出連結的檔名
fn parse_links(html: &str) -> Vec<String> {
    href_regex()
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let href = m.as_str();
            let href = href.split('#').next().unwrap_or(href);
            href.rsplit('/').next().unwrap_or(href).to_string()
        })
        .collect()
}

pub fn is_index_server_cmdline(cmdline: &[String]) -> bool {
    let Some(program) = cmdline.first() else {
        return false;
    };
    let is_insiders = Path::new(program)
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy() == "insiders");
    is_insiders && cmdline.windows(2).any(|w| w[0] == "index" && w[1] == "start")
}

/// `-P PATH`、`-PPATH`、`--log-path PATH` 或 `--log-path=PATH`
pub fn log_path_from_cmdline(cmdline: &[String]) -> Option<PathBuf> {
    let mut args = cmdline.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-P" || arg == "--log-path" {
            return args.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("--log-path=") {
            return Some(PathBuf::from(value));
        }
        if let Some(value) = arg.strip_prefix("-P").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(value));
        }
    }
    None
}

fn scan_processes() -> System {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_user(UpdateKind::Always),
    );
    system
}

fn find_server(system: &System) -> Option<(Pid, Vec<String>)> {
    let current = sysinfo::get_current_pid().ok();
    let mut candidates: Vec<(Pid, Vec<String>)> = system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != current)
        .map(|(pid, process)| {
            let cmdline = process
                .cmd()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            (*pid, cmdline)
        })
        .filter(|(_, cmdline)| is_index_server_cmdline(cmdline))
        .collect();
    candidates.sort_by_key(|(pid, _)| *pid);
    candidates.into_iter().next()
}

pub fn status() -> Option<ServerStatus> {
    let system = scan_processes();
    let (pid, cmdline) = find_server(&system)?;
    let process = system.process(pid)?;
    let users = Users::new_with_refreshed_list();
    let username = process
        .user_id()
        .and_then(|uid| users.get_user_by_id(uid))
        .map(|u| u.name().to_string());
    Some(ServerStatus {
        pid: pid.as_u32(),
        ppid: process.parent().map(|p| p.as_u32()),
        name: process.name().to_string_lossy().into_owned(),
        cmdline,
        create_time: process.start_time(),
        username,
    })
}

/// 回傳是否有行程被停止
pub fn stop() -> bool {
    let system = scan_processes();
    match find_server(&system).and_then(|(pid, _)| system.process(pid)) {
        Some(process) => {
            let killed = process.kill();
            if killed {
                tracing::info!("Stopped index server (PID {})", process.pid());
            }
            killed
        }
        None => false,
    }
}

pub fn logs() -> Result<PathBuf> {
    let status = status().ok_or_else(|| InsidersError::not_found("running index server"))?;
    log_path_from_cmdline(&status.cmdline)
        .ok_or_else(|| InsidersError::not_found("log file of the index server"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_repository_spec() {
        let spec = RepositorySpec::parse("pawamoy-insiders/mkdocstrings-python").unwrap();
        assert_eq!(spec.url, "https://github.com/pawamoy-insiders/mkdocstrings-python.git");
        assert_eq!(spec.name, "mkdocstrings-python");

        let spec = RepositorySpec::parse("pawamoy-insiders/griffe:griffe-insiders").unwrap();
        assert_eq!(spec.name, "griffe-insiders");

        let spec = RepositorySpec::parse("git@github.com:org/project.git").unwrap();
        assert_eq!(spec.url, "git@github.com:org/project.git");
        assert_eq!(spec.name, "project");

        let spec = RepositorySpec::parse("https://example.com/a/b.git:custom").unwrap();
        assert_eq!(spec.url, "https://example.com/a/b.git");
        assert_eq!(spec.name, "custom");

        assert!(RepositorySpec::parse("just-a-name").is_err());
    }

    #[test]
    fn test_parse_links() {
        let html = r#"<a href="/packages/pkg-1.0.tar.gz#sha256=abc">pkg-1.0.tar.gz</a><br/>
            <a href="../../packages/pkg-1.1-py3-none-any.whl">x</a>"#;
        assert_eq!(
            parse_links(html),
            vec!["pkg-1.0.tar.gz".to_string(), "pkg-1.1-py3-none-any.whl".to_string()]
        );
    }

    #[test]
    fn test_index_server_cmdline() {
        assert!(is_index_server_cmdline(&args("/usr/bin/insiders -L DEBUG index start --port 1")));
        assert!(!is_index_server_cmdline(&args("insiders index status")));
        assert!(!is_index_server_cmdline(&args("vim index start")));
        assert!(!is_index_server_cmdline(&[]));
    }

    #[test]
    fn test_log_path_from_cmdline() {
        assert_eq!(
            log_path_from_cmdline(&args("insiders -P /tmp/a.log index start")),
            Some(PathBuf::from("/tmp/a.log"))
        );
        assert_eq!(
            log_path_from_cmdline(&args("insiders -P/tmp/b.log index start")),
            Some(PathBuf::from("/tmp/b.log"))
        );
        assert_eq!(
            log_path_from_cmdline(&args("insiders --log-path=/tmp/c.log index start")),
            Some(PathBuf::from("/tmp/c.log"))
        );
        assert_eq!(log_path_from_cmdline(&args("insiders index start")), None);
    }

    #[test]
    fn test_list_and_port() {
        let temp = tempfile::TempDir::new().unwrap();
        let index = Index::new(
            "http://localhost:31411",
            temp.path().join("repos"),
            temp.path().join("dists"),
            vec!["true".to_string()],
        )
        .unwrap();
        std::fs::write(index.dist_dir().join("b-1.0.tar.gz"), b"").unwrap();
        std::fs::write(index.dist_dir().join("a-1.0.tar.gz"), b"").unwrap();
        let names: Vec<_> = index
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-1.0.tar.gz", "b-1.0.tar.gz"]);
        assert_eq!(index.port().unwrap(), 31411);
    }
}
