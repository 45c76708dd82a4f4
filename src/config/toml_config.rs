use crate::config::defaults;
use crate::domain::ports::OrgMembers;
use crate::domain::sort::SortStrategy;
use crate::utils::error::{InsidersError, Result};
use crate::utils::logger::LogLevel;
use crate::utils::process::shell_output;
use crate::utils::validation::{validate_non_empty_string, validate_team, validate_url, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 單一字串或字串陣列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SponsorsSection {
    pub minimum_amount: Option<u64>,
    pub exclude_private: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BacklogSection {
    pub namespaces: Option<Vec<String>>,
    pub sort: Option<OneOrMany>,
    pub issue_labels: Option<BTreeMap<String, String>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GitHubSection {
    pub token_command: Option<String>,
    pub organization_members: Option<OrgMembers>,
    pub project_namespace: Option<String>,
    pub insiders_project_namespace: Option<String>,
    pub insiders_team: Option<String>,
    pub include_users: Option<BTreeSet<String>>,
    pub exclude_users: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProjectSection {
    pub copier_template: Option<String>,
    pub register_on_pypi: Option<bool>,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PyPISection {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IndexSection {
    pub distribution_directory: Option<PathBuf>,
    pub source_directory: Option<PathBuf>,
    pub url: Option<String>,
    pub start_in_background: Option<bool>,
    pub log_level: Option<String>,
    pub log_path: Option<PathBuf>,
    pub build_command: Option<OneOrMany>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolarSection {
    pub token_command: Option<String>,
}

/// `insiders.toml` 的內容，所有鍵皆為選填
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sponsors: SponsorsSection,
    pub backlog: BacklogSection,
    pub github: GitHubSection,
    pub project: ProjectSection,
    pub pypi: PyPISection,
    pub index: IndexSection,
    pub polar: PolarSection,
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex"))
}

/// 展開開頭的 `~`
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.path = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed)?)
    }

    /// 替換環境變數 (例如 ${GITHUB_ORG})，未定義的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_regex()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 預設位置沒有設定檔時回傳空配置
    pub fn from_default_location() -> Result<Self> {
        match defaults::config_file() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// 指定的設定檔必須存在
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(expand_home(path)),
            None => Self::from_default_location(),
        }
    }

    async fn run_token_command(command: Option<&str>) -> Result<Option<String>> {
        match command.filter(|c| !c.trim().is_empty()) {
            Some(command) => {
                let token = shell_output(command).await?;
                Ok(Some(token).filter(|t| !t.is_empty()))
            }
            None => Ok(None),
        }
    }

    pub async fn github_token(&self) -> Result<Option<String>> {
        Self::run_token_command(self.github.token_command.as_deref()).await
    }

    pub async fn polar_token(&self) -> Result<Option<String>> {
        Self::run_token_command(self.polar.token_command.as_deref()).await
    }

    pub fn backlog_sort(&self) -> Result<Vec<SortStrategy>> {
        match &self.backlog.sort {
            None => Ok(Vec::new()),
            Some(OneOrMany::One(text)) => SortStrategy::parse_list(text),
            Some(OneOrMany::Many(items)) => items.iter().map(|item| item.parse()).collect(),
        }
    }

    pub fn build_command(&self) -> Vec<String> {
        match &self.index.build_command {
            Some(OneOrMany::One(line)) => line.split_whitespace().map(str::to_string).collect(),
            Some(OneOrMany::Many(parts)) => parts.clone(),
            None => defaults::build_command(),
        }
    }

    pub fn index_url(&self) -> String {
        self.index
            .url
            .clone()
            .unwrap_or_else(|| defaults::DEFAULT_INDEX_URL.to_string())
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.index
            .source_directory
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(defaults::repo_dir)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.index
            .distribution_directory
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(defaults::dist_dir)
    }

    pub fn index_log_level(&self) -> Result<Option<LogLevel>> {
        self.index.log_level.as_deref().map(str::parse).transpose()
    }

    pub fn organization_members(&self) -> OrgMembers {
        self.github.organization_members.clone().unwrap_or_default()
    }

    pub fn issue_labels(&self) -> BTreeMap<String, String> {
        self.backlog.issue_labels.clone().unwrap_or_default()
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.index.url {
            validate_url("index.url", url)?;
        }
        if let Some(team) = &self.github.insiders_team {
            validate_team("github.insiders-team", team)?;
        }
        if let Some(namespaces) = &self.backlog.namespaces {
            for namespace in namespaces {
                validate_non_empty_string("backlog.namespaces", namespace)?;
            }
        }
        if self.build_command().is_empty() {
            return Err(InsidersError::InvalidConfigValueError {
                field: "index.build-command".to_string(),
                value: String::new(),
                reason: "Build command cannot be empty".to_string(),
            });
        }
        self.index_log_level()?;
        self.backlog_sort()?;
        Ok(())
    }
}
