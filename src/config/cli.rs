use crate::utils::logger::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "insiders", version)]
#[command(about = "Manage your Insiders projects")]
#[command(
    long_about = "Manage local and remote Git repositories for projects that offer an Insiders \
                  version: sponsors, GitHub teams, the issue backlog and a local package index."
)]
pub struct Cli {
    /// Configuration file (default: <config dir>/insiders/insiders.toml)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short = 'L', long, global = true, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr
    #[arg(short = 'P', long, global = true, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Print debug information and exit
    #[arg(long)]
    pub debug_info: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the issues in the backlog, ranked by funding
    Backlog(BacklogArgs),
    /// Manage the local index
    #[command(subcommand)]
    Index(IndexCommand),
    /// Manage projects (GitHub and local copies)
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Manage PyPI-related things
    #[command(subcommand)]
    Pypi(PypiCommand),
    /// List and export sponsors
    #[command(subcommand)]
    Sponsors(SponsorsCommand),
    /// Manage GitHub teams
    #[command(subcommand)]
    Team(TeamCommand),
}

#[derive(Debug, Clone, Args)]
pub struct GitHubTokenArg {
    /// GitHub token (scopes: read:user, admin:org for team management)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BacklogArgs {
    /// Namespaces to fetch issues from
    #[arg(long, num_args = 1.., env = "BACKLOG_NAMESPACES", value_delimiter = ',')]
    pub github_namespaces: Vec<String>,

    #[command(flatten)]
    pub github: GitHubTokenArg,

    /// Polar token (scopes: issues:read)
    #[arg(long, env = "POLAR_TOKEN", hide_env_values = true)]
    pub polar_token: Option<String>,

    /// Sort strategies, e.g. "min_sponsorships(50),label(bug),created"
    #[arg(short = 's', long)]
    pub sort: Option<String>,

    /// Only use public sponsorships
    #[arg(long)]
    pub public: bool,

    /// Limit the number of issues to display (0 = all)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct IndexOptions {
    /// URL of the index
    #[arg(short = 'i', long)]
    pub url: Option<String>,

    /// Directory where the repositories are cloned
    #[arg(short = 'r', long)]
    pub repo_dir: Option<PathBuf>,

    /// Directory where the distributions are stored
    #[arg(short = 'd', long)]
    pub dist_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// List distributions stored in the index
    List {
        #[command(flatten)]
        options: IndexOptions,
    },
    /// Watch repositories and publish their latest tag
    Add {
        /// URL_OR_NAMESPACE/PROJECT[:NAME] specifications
        #[arg(required = true, num_args = 1..)]
        repositories: Vec<String>,
        #[command(flatten)]
        options: IndexOptions,
    },
    /// Stop watching repositories and delete their distributions
    Remove {
        #[arg(required = true, num_args = 1..)]
        repositories: Vec<String>,
        #[command(flatten)]
        options: IndexOptions,
    },
    /// Build and publish new tags of watched repositories
    Update {
        /// Repositories to update (default: all)
        repositories: Vec<String>,
        #[command(flatten)]
        options: IndexOptions,
    },
    /// Start the index server
    Start {
        #[command(flatten)]
        options: IndexOptions,
        /// Run the server in the background
        #[arg(short = 'b', long, conflicts_with = "foreground")]
        background: bool,
        /// Run the server in the foreground even if configured otherwise
        #[arg(long)]
        foreground: bool,
    },
    /// Show the server status
    Status,
    /// Stop the server
    Stop,
    /// Show the server log file
    Logs {
        /// Keep printing new lines
        #[arg(short = 'f', long)]
        follow: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ProjectTarget {
    /// Namespace of the public repository
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Name of the public repository
    #[arg(short = 'r', long)]
    pub repo: String,

    /// Namespace of the insiders repository
    #[arg(short = 'N', long)]
    pub insiders_namespace: Option<String>,

    /// Name of the insiders repository (default: the public name)
    #[arg(short = 'R', long)]
    pub insiders_repo: Option<String>,

    /// Local path of the public repository
    #[arg(short = 'p', long)]
    pub repo_path: Option<PathBuf>,

    /// Local path of the insiders repository
    #[arg(long)]
    pub insiders_repo_path: Option<PathBuf>,

    #[command(flatten)]
    pub github: GitHubTokenArg,
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    /// Create public and insiders repositories
    Create {
        #[command(flatten)]
        target: ProjectTarget,
        /// Shared description
        #[arg(short = 'd', long)]
        description: String,
        /// PyPI username (default: the public namespace)
        #[arg(short = 'u', long)]
        username: Option<String>,
        /// Copier template to generate the insiders repository with
        #[arg(short = 't', long)]
        copier_template: Option<String>,
        /// Register the project name on PyPI as version 0.0.0
        #[arg(short = 'i', long)]
        register_pypi: bool,
    },
    /// Check that public and insiders repositories are consistent
    Check {
        #[command(flatten)]
        target: ProjectTarget,
    },
}

#[derive(Debug, Subcommand)]
pub enum PypiCommand {
    /// Reserve a project name on PyPI
    Register {
        /// Username on PyPI
        #[arg(short = 'u', long)]
        username: Option<String>,
        /// Name to register
        #[arg(short = 'n', long)]
        name: String,
        /// Description of the project on PyPI
        #[arg(short = 'd', long)]
        description: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SponsorsArgs {
    #[command(flatten)]
    pub github: GitHubTokenArg,

    /// Only use public sponsorships
    #[arg(long)]
    pub public: bool,
}

#[derive(Debug, Subcommand)]
pub enum SponsorsCommand {
    /// Print a table of current sponsors
    List {
        #[command(flatten)]
        args: SponsorsArgs,
    },
    /// Write numbers.json and/or sponsors.json
    Export {
        #[command(flatten)]
        args: SponsorsArgs,
        /// Where to write sponsorship numbers
        #[arg(long, value_name = "PATH")]
        numbers: Option<PathBuf>,
        /// Where to write sponsor accounts
        #[arg(long, value_name = "PATH")]
        sponsors: Option<PathBuf>,
        /// Include private sponsors in sponsors.json
        #[arg(long)]
        include_private: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TeamArgs {
    /// Team as ORG/TEAM (default: github.insiders-team)
    pub team: Option<String>,

    #[command(flatten)]
    pub github: GitHubTokenArg,
}

#[derive(Debug, Subcommand)]
pub enum TeamCommand {
    /// List members and pending invitations of a team
    List {
        #[command(flatten)]
        args: TeamArgs,
    },
    /// Grant or revoke team access according to current sponsors
    Sync {
        #[command(flatten)]
        args: TeamArgs,
        /// Minimum monthly amount to be considered an Insider
        #[arg(long)]
        min_amount: Option<u64>,
        /// Users that should always be in the team
        #[arg(long, value_delimiter = ',')]
        include_users: Vec<String>,
        /// Users that should never be in the team
        #[arg(long, value_delimiter = ',')]
        exclude_users: Vec<String>,
        /// Show what would change without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}
