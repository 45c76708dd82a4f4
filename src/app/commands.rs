//! Command dispatch: resolves every option (command line, environment,
//! configuration file, default) and calls into the core operations.

use crate::adapters::github::GitHub;
use crate::adapters::polar::Polar;
use crate::adapters::pypi::reserve_pypi;
use crate::config::cli::{
    BacklogArgs, Cli, Command, GitHubTokenArg, IndexCommand, IndexOptions, ProjectCommand,
    ProjectTarget, PypiCommand, SponsorsArgs, SponsorsCommand, TeamArgs, TeamCommand,
};
use crate::config::{defaults, Config};
use crate::core::backlog::{get_backlog, render_backlog};
use crate::core::index::{self, Index, RepositorySpec};
use crate::core::project::{check_project, create_project, NewProject, ProjectLocation};
use crate::core::sponsors::{
    eligible_users, render_sponsors, sync_team, team_members_and_invitations, write_numbers,
    write_sponsors, TeamSyncPlan,
};
use crate::domain::model::Sponsors;
use crate::domain::ports::{IssueSource, SponsorSource};
use crate::domain::sort::SortStrategy;
use crate::utils::error::{InsidersError, Result};
use crate::utils::logger::LogLevel;
use crate::utils::validation::validate_team;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// 解析後的全域選項
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_path: Option<PathBuf>,
}

fn missing(field: &str) -> InsidersError {
    InsidersError::MissingConfigError {
        field: field.to_string(),
    }
}

async fn github_token(arg: &GitHubTokenArg, config: &Config) -> Result<String> {
    if let Some(token) = arg.github_token.clone().filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    config
        .github_token()
        .await?
        .ok_or_else(|| missing("github.token-command (or --github-token / GITHUB_TOKEN)"))
}

async fn github_client(arg: &GitHubTokenArg, config: &Config) -> Result<GitHub> {
    GitHub::new(&github_token(arg, config).await?)
}

/// GitHub 贊助，若有 Polar 也一併合併（Polar 不支援時僅警告）
async fn fetch_sponsors(
    github: &GitHub,
    polar: Option<&Polar>,
    config: &Config,
    exclude_private: bool,
) -> Result<Sponsors> {
    let org_members = config.organization_members();
    tracing::info!("Fetching sponsors from {}", SponsorSource::platform_name(github));
    let mut sponsors = github.get_sponsors(&org_members, exclude_private).await?;
    if let Some(polar) = polar {
        match polar.get_sponsors(&org_members, exclude_private).await {
            Ok(more) => {
                sponsors.merge(more);
            }
            Err(e @ InsidersError::Unsupported { .. }) => tracing::warn!("⚠️ {}", e),
            Err(e) => return Err(e),
        }
    }
    tracing::debug!("Got {} sponsorships", sponsors.count());
    Ok(sponsors)
}

pub async fn run(cli: Cli, ctx: Context) -> Result<i32> {
    let Some(command) = cli.command else {
        return Err(InsidersError::config(
            "No command given, run `insiders --help` to list the commands",
        ));
    };
    match command {
        Command::Backlog(args) => backlog(args, &ctx).await,
        Command::Index(command) => index_command(command, &ctx).await,
        Command::Project(command) => project_command(command, &ctx).await,
        Command::Pypi(command) => pypi_command(command, &ctx).await,
        Command::Sponsors(command) => sponsors_command(command, &ctx).await,
        Command::Team(command) => team_command(command, &ctx).await,
    }
}

async fn backlog(args: BacklogArgs, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    let namespaces = if args.github_namespaces.is_empty() {
        config
            .backlog
            .namespaces
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| missing("backlog.namespaces (or --github-namespaces)"))?
    } else {
        args.github_namespaces.clone()
    };
    let sort = match &args.sort {
        Some(text) => SortStrategy::parse_list(text)?,
        None => config.backlog_sort()?,
    };
    let limit = args.limit.or(config.backlog.limit).unwrap_or(0);
    let exclude_private = args.public || config.sponsors.exclude_private.unwrap_or(false);

    let github = github_client(&args.github, config).await?;
    let polar_token = match args.polar_token.clone().filter(|t| !t.is_empty()) {
        Some(token) => Some(token),
        None => config.polar_token().await?,
    };
    let polar = polar_token.as_deref().map(Polar::new).transpose()?;

    let sponsors = fetch_sponsors(&github, polar.as_ref(), config, exclude_private).await?;

    let issue_labels = config.issue_labels();
    let allow_labels: BTreeSet<String> = issue_labels.keys().cloned().collect();
    tracing::info!("Fetching issues from {}", namespaces.join(", "));
    let mut backlog = get_backlog(
        &namespaces,
        &github,
        polar.as_ref().map(|p| p as &dyn IssueSource),
        &allow_labels,
    )
    .await?;
    backlog.sort(&sort, &sponsors);

    print!(
        "{}",
        render_backlog(&backlog, &sponsors, &issue_labels, limit, polar.is_some())
    );
    Ok(0)
}

fn build_index(options: &IndexOptions, config: &Config) -> Result<Index> {
    let url = options.url.clone().unwrap_or_else(|| config.index_url());
    let repo_dir = options.repo_dir.clone().unwrap_or_else(|| config.repo_dir());
    let dist_dir = options.dist_dir.clone().unwrap_or_else(|| config.dist_dir());
    Index::new(&url, repo_dir, dist_dir, config.build_command())
}

/// 背景伺服器的命令列：與目前相同的選項，強制前景執行
fn background_args(ctx: &Context, index: &Index, repo_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(path) = &ctx.config_path {
        args.push("-c".into());
        args.push(path.into());
    }
    args.push("-L".into());
    args.push(ctx.log_level.as_str().into());
    if let Some(path) = &ctx.log_path {
        args.push("-P".into());
        args.push(path.into());
    }
    args.extend(["index", "start", "--foreground", "-i"].map(OsString::from));
    args.push(index.url().into());
    args.push("-r".into());
    args.push(repo_dir.into());
    args.push("-d".into());
    args.push(index.dist_dir().into());
    args
}

async fn follow_file(path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = String::new();
    file.read_to_string(&mut buffer).await?;
    print!("{}", buffer);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        let position = file.stream_position().await?;
        // 檔案被截斷時從頭開始
        if tokio::fs::metadata(path).await?.len() < position {
            file.seek(std::io::SeekFrom::Start(0)).await?;
        }
        buffer.clear();
        file.read_to_string(&mut buffer).await?;
        print!("{}", buffer);
    }
}

async fn index_command(command: IndexCommand, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    match command {
        IndexCommand::List { options } => {
            for path in build_index(&options, config)?.list()? {
                if let Some(name) = path.file_name() {
                    println!("{}", name.to_string_lossy());
                }
            }
        }
        IndexCommand::Add {
            repositories,
            options,
        } => {
            let index = build_index(&options, config)?;
            let specs = repositories
                .iter()
                .map(|r| RepositorySpec::parse(r))
                .collect::<Result<Vec<_>>>()?;
            for spec in &specs {
                index.add(spec).await?;
            }
        }
        IndexCommand::Remove {
            repositories,
            options,
        } => {
            let index = build_index(&options, config)?;
            for name in &repositories {
                index.remove(name)?;
                tracing::info!("Removed {}", name);
            }
        }
        IndexCommand::Update {
            repositories,
            options,
        } => {
            build_index(&options, config)?.update(&repositories).await?;
        }
        IndexCommand::Start {
            options,
            background,
            foreground,
        } => {
            let index = build_index(&options, config)?;
            let background =
                !foreground && (background || config.index.start_in_background.unwrap_or(false));
            if background {
                let repo_dir = options.repo_dir.clone().unwrap_or_else(|| config.repo_dir());
                let pid = index::spawn_background(&background_args(ctx, &index, &repo_dir))?;
                println!("Index server started in the background (PID {})", pid);
            } else {
                index.serve().await?;
            }
        }
        IndexCommand::Status => match index::status() {
            Some(status) => {
                println!("Running:");
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            None => println!("Not running"),
        },
        IndexCommand::Stop => {
            if !index::stop() {
                eprintln!("Index server is not running");
                return Ok(1);
            }
        }
        IndexCommand::Logs { follow } => match index::logs() {
            Ok(path) if follow => follow_file(&path).await?,
            Ok(path) => println!("{}", path.display()),
            Err(e) => {
                eprintln!("{}", e);
                return Ok(1);
            }
        },
    }
    Ok(0)
}

fn new_project(target: &ProjectTarget, config: &Config, description: String) -> Result<NewProject> {
    let namespace = target
        .namespace
        .clone()
        .or_else(|| config.github.project_namespace.clone())
        .ok_or_else(|| missing("github.project-namespace (or --namespace)"))?;
    let insiders_namespace = target
        .insiders_namespace
        .clone()
        .or_else(|| config.github.insiders_project_namespace.clone())
        .unwrap_or_else(|| namespace.clone());
    let insiders_name = target.insiders_repo.clone().unwrap_or_else(|| target.repo.clone());

    let directory = match &config.project.directory {
        Some(dir) => crate::config::toml_config::expand_home(dir),
        None => std::env::current_dir()?,
    };
    let public_path = target
        .repo_path
        .clone()
        .unwrap_or_else(|| directory.join(&target.repo));
    let insiders_path = target
        .insiders_repo_path
        .clone()
        .unwrap_or_else(|| directory.join("insiders").join(&insiders_name));

    Ok(NewProject {
        public: ProjectLocation {
            namespace,
            name: target.repo.clone(),
            path: public_path,
        },
        insiders: ProjectLocation {
            namespace: insiders_namespace,
            name: insiders_name,
            path: insiders_path,
        },
        description,
        username: None,
        copier_template: None,
        register_pypi: false,
    })
}

async fn project_command(command: ProjectCommand, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    match command {
        ProjectCommand::Create {
            target,
            description,
            username,
            copier_template,
            register_pypi,
        } => {
            let mut project = new_project(&target, config, description)?;
            project.username = username.or_else(|| config.pypi.username.clone());
            project.copier_template =
                copier_template.or_else(|| config.project.copier_template.clone());
            project.register_pypi = register_pypi || config.project.register_on_pypi.unwrap_or(false);
            let github = github_client(&target.github, config).await?;
            create_project(&github, &project, &config.build_command()).await?;
            Ok(0)
        }
        ProjectCommand::Check { target } => {
            let project = new_project(&target, config, String::new())?;
            let github = github_client(&target.github, config).await?;
            let findings = check_project(&github, &project).await?;
            for finding in &findings {
                println!("{}", finding);
            }
            Ok(if findings.iter().all(|f| f.ok) { 0 } else { 1 })
        }
    }
}

async fn pypi_command(command: PypiCommand, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    match command {
        PypiCommand::Register {
            username,
            name,
            description,
        } => {
            let username = username
                .or_else(|| config.pypi.username.clone())
                .ok_or_else(|| missing("pypi.username (or --username)"))?;
            reserve_pypi(&username, &name, &description, &config.build_command()).await?;
            Ok(0)
        }
    }
}

async fn sponsors_for(args: &SponsorsArgs, config: &Config) -> Result<Sponsors> {
    let github = github_client(&args.github, config).await?;
    let exclude_private = args.public || config.sponsors.exclude_private.unwrap_or(false);
    fetch_sponsors(&github, None, config, exclude_private).await
}

async fn sponsors_command(command: SponsorsCommand, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    match command {
        SponsorsCommand::List { args } => {
            let sponsors = sponsors_for(&args, config).await?;
            print!("{}", render_sponsors(&sponsors));
        }
        SponsorsCommand::Export {
            args,
            numbers,
            sponsors: sponsors_path,
            include_private,
        } => {
            let sponsors = sponsors_for(&args, config).await?;
            let (numbers, sponsors_path) = match (numbers, sponsors_path) {
                (None, None) => (
                    Some(PathBuf::from("numbers.json")),
                    Some(PathBuf::from("sponsors.json")),
                ),
                other => other,
            };
            if let Some(path) = numbers {
                write_numbers(&sponsors, &path)?;
            }
            if let Some(path) = sponsors_path {
                write_sponsors(&sponsors, &path, include_private)?;
            }
        }
    }
    Ok(0)
}

fn resolve_team(args: &TeamArgs, config: &Config) -> Result<(String, String)> {
    let team = args
        .team
        .clone()
        .or_else(|| config.github.insiders_team.clone())
        .ok_or_else(|| missing("github.insiders-team (or TEAM argument)"))?;
    validate_team("team", &team)
}

fn user_set(from_cli: Vec<String>, from_config: &Option<BTreeSet<String>>) -> BTreeSet<String> {
    if from_cli.is_empty() {
        from_config.clone().unwrap_or_default()
    } else {
        from_cli.into_iter().collect()
    }
}

async fn team_command(command: TeamCommand, ctx: &Context) -> Result<i32> {
    let config = &ctx.config;
    match command {
        TeamCommand::List { args } => {
            let (org, team) = resolve_team(&args, config)?;
            let github = github_client(&args.github, config).await?;
            let (members, invitations) = team_members_and_invitations(&github, &org, &team).await?;
            println!("Members of {}/{} ({}):", org, team, members.len());
            for member in &members {
                println!("  @{}", member);
            }
            println!("Pending invitations ({}):", invitations.len());
            for login in &invitations {
                println!("  @{}", login);
            }
        }
        TeamCommand::Sync {
            args,
            min_amount,
            include_users,
            exclude_users,
            dry_run,
        } => {
            let (org, team) = resolve_team(&args, config)?;
            let minimum = min_amount
                .or(config.sponsors.minimum_amount)
                .ok_or_else(|| missing("sponsors.minimum-amount (or --min-amount)"))?;
            let include = user_set(include_users, &config.github.include_users);
            let exclude = user_set(exclude_users, &config.github.exclude_users);

            let github = github_client(&args.github, config).await?;
            let sponsors = fetch_sponsors(&github, None, config, false).await?;
            let eligible = eligible_users(&sponsors, minimum, &include, &exclude);
            tracing::debug!("{} eligible users", eligible.len());

            if dry_run {
                let (members, invitations) =
                    team_members_and_invitations(&github, &org, &team).await?;
                let current: BTreeSet<String> = members.union(&invitations).cloned().collect();
                let plan = TeamSyncPlan::compute(&current, &eligible);
                for user in &plan.grant {
                    println!("+ @{}", user);
                }
                for user in &plan.revoke {
                    println!("- @{}", user);
                }
                if plan.is_empty() {
                    println!("{}/{} is up to date", org, team);
                }
            } else {
                let report = sync_team(&github, &org, &team, &eligible).await?;
                println!(
                    "Granted: {}, revoked: {}, failed: {}",
                    report.granted.len(),
                    report.revoked.len(),
                    report.failed.len()
                );
                if !report.failed.is_empty() {
                    tracing::warn!("⚠️ Failed for: {}", report.failed.join(", "));
                }
            }
        }
    }
    Ok(0)
}

/// `--debug-info` 的輸出內容
pub fn debug_info(config_path: Option<&Path>) -> String {
    let config_path = config_path
        .map(Path::to_path_buf)
        .or_else(defaults::config_file)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string());
    let mut lines = vec![
        format!("insiders {}", env!("CARGO_PKG_VERSION")),
        format!("OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH),
        format!("Configuration file: {}", config_path),
        format!("Repositories: {}", defaults::repo_dir().display()),
        format!("Distributions: {}", defaults::dist_dir().display()),
        "Environment variables:".to_string(),
    ];
    for var in ["GITHUB_TOKEN", "POLAR_TOKEN"] {
        let state = if std::env::var_os(var).is_some() { "<set>" } else { "<unset>" };
        lines.push(format!("  {}: {}", var, state));
    }
    for var in ["BACKLOG_NAMESPACES", "RUST_LOG"] {
        let value = std::env::var(var).unwrap_or_else(|_| "<unset>".to_string());
        lines.push(format!("  {}: {}", var, value));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(config: Config) -> Context {
        Context {
            config,
            config_path: Some(PathBuf::from("/etc/insiders.toml")),
            log_level: LogLevel::Debug,
            log_path: Some(PathBuf::from("/tmp/index.log")),
        }
    }

    #[test]
    fn test_background_args_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let index = Index::new(
            "http://localhost:9999",
            temp.path().join("repos"),
            temp.path().join("dists"),
            defaults::build_command(),
        )
        .unwrap();
        let args = background_args(&ctx(Config::default()), &index, &temp.path().join("repos"));
        let mut cmdline = vec!["/usr/bin/insiders".to_string()];
        cmdline.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));

        assert!(index::is_index_server_cmdline(&cmdline));
        assert_eq!(
            index::log_path_from_cmdline(&cmdline),
            Some(PathBuf::from("/tmp/index.log"))
        );

        let cli = <Cli as clap::Parser>::try_parse_from(&cmdline).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(matches!(
            cli.command,
            Some(Command::Index(IndexCommand::Start { foreground: true, .. }))
        ));
    }

    #[test]
    fn test_new_project_defaults() {
        let config = Config::from_toml_str(
            "[github]\nproject-namespace = \"pawamoy\"\ninsiders-project-namespace = \"pawamoy-insiders\"\n\n[project]\ndirectory = \"/data/dev\"\n",
        )
        .unwrap();
        let target = ProjectTarget {
            namespace: None,
            repo: "griffe".to_string(),
            insiders_namespace: None,
            insiders_repo: None,
            repo_path: None,
            insiders_repo_path: None,
            github: GitHubTokenArg { github_token: None },
        };
        let project = new_project(&target, &config, "Signatures".to_string()).unwrap();
        assert_eq!(project.public.slug(), "pawamoy/griffe");
        assert_eq!(project.insiders.slug(), "pawamoy-insiders/griffe");
        assert_eq!(project.public.path, PathBuf::from("/data/dev/griffe"));
        assert_eq!(project.insiders.path, PathBuf::from("/data/dev/insiders/griffe"));
    }

    #[test]
    fn test_new_project_requires_namespace() {
        let target = ProjectTarget {
            namespace: None,
            repo: "griffe".to_string(),
            insiders_namespace: None,
            insiders_repo: None,
            repo_path: None,
            insiders_repo_path: None,
            github: GitHubTokenArg { github_token: None },
        };
        assert!(matches!(
            new_project(&target, &Config::default(), String::new()),
            Err(InsidersError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_resolve_team() {
        let config = Config::from_toml_str("[github]\ninsiders-team = \"org/insiders\"\n").unwrap();
        let args = TeamArgs {
            team: None,
            github: GitHubTokenArg { github_token: None },
        };
        assert_eq!(
            resolve_team(&args, &config).unwrap(),
            ("org".to_string(), "insiders".to_string())
        );
        let args = TeamArgs {
            team: Some("other/team".to_string()),
            github: GitHubTokenArg { github_token: None },
        };
        assert_eq!(resolve_team(&args, &config).unwrap().0, "other");
    }

    #[test]
    fn test_user_set_prefers_cli() {
        let from_config = Some(BTreeSet::from(["a".to_string()]));
        assert_eq!(user_set(vec![], &from_config).len(), 1);
        assert!(user_set(vec!["b".to_string()], &from_config).contains("b"));
    }

    #[test]
    fn test_debug_info() {
        let info = debug_info(Some(Path::new("/tmp/custom.toml")));
        assert!(info.contains("/tmp/custom.toml"));
        assert!(info.contains("GITHUB_TOKEN"));
    }
}
