//! Command-line interface.
//!
//! - `notify` - send the deployment email now
//! - `hook <task>` - run every task registered after `<task>` (e.g. `deploy:restart`)
//! - `tasks` - list registered tasks
//! - `config check` - validate the configuration file

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::git;
use crate::hooks::{self, TaskRegistry, NOTIFY_MAIL_TASK};
use crate::notifications::{compose::resolve_link_prefix, DeploymentFacts};

#[derive(Parser, Debug)]
#[command(name = "deploy-notifier")]
#[command(author, version, about = "Email notifications for finished deploys", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "DEPLOY_NOTIFIER_CONFIG", default_value = "deploy-notifier.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send the deployment notification email
    Notify(DeployArgs),

    /// Run the tasks registered after a finished host task
    Hook {
        /// Task that just finished, e.g. deploy:restart
        task: String,
        #[command(flatten)]
        deploy: DeployArgs,
    },

    /// List registered tasks
    Tasks,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Facts about the deploy, supplied by the host deploy tool
#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Application name
    #[arg(long, env = "APPLICATION")]
    pub application: String,

    /// Deployed branch
    #[arg(long, env = "BRANCH", default_value = "master")]
    pub branch: String,

    /// Stage / environment name
    #[arg(long, env = "STAGE")]
    pub stage: Option<String>,

    /// Deployer name (defaults to $DEPLOYER, then git user.name)
    #[arg(long)]
    pub user: Option<String>,

    /// Revision that was live before this deploy
    #[arg(long, env = "PREVIOUS_REVISION")]
    pub previous_revision: Option<String>,

    /// Revision that was just deployed
    #[arg(long, env = "CURRENT_REVISION")]
    pub current_revision: Option<String>,

    /// Explicit commit range, skips revision lookup
    #[arg(long, conflicts_with_all = ["previous_revision", "current_revision"])]
    pub range: Option<String>,

    /// Read the change log from a file instead of running git log
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Working copy to query git in
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
}

impl DeployArgs {
    /// Resolve the arguments into deployment facts, asking git for whatever is missing
    pub async fn into_facts(self) -> Result<DeploymentFacts> {
        let user_name = match self.user {
            Some(user) => user,
            None => git::deployer_name(&self.repo).await,
        };

        let git_range = match self.range {
            Some(range) => Some(range),
            None => {
                let previous = match self.previous_revision.as_deref() {
                    Some(rev) => Some(git::short_revision(&self.repo, rev).await?),
                    None => None,
                };
                let current = match self.current_revision.as_deref() {
                    Some(rev) => Some(git::short_revision(&self.repo, rev).await?),
                    None => None,
                };
                git::commit_range(previous.as_deref(), current.as_deref())
            }
        };

        let git_log = match (&self.log_file, &git_range) {
            (Some(path), _) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read log file: {}", path.display()))?,
            (None, Some(range)) => git::commit_log(&self.repo, range).await?,
            (None, None) => String::new(),
        };

        Ok(DeploymentFacts {
            application: self.application,
            user_name,
            branch: self.branch,
            stage: self.stage.unwrap_or_default(),
            timestamp: Local::now().into(),
            git_range,
            git_log,
        })
    }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let registry = TaskRegistry::with_defaults();
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Notify(deploy) => {
            let facts = deploy.into_facts().await?;
            hooks::run_task(NOTIFY_MAIL_TASK, &config, &facts, &mut stdout).await
        }
        Commands::Hook { task, deploy } => {
            let facts = deploy.into_facts().await?;
            let ran = hooks::run_after(&registry, &task, &config, &facts, &mut stdout).await?;
            tracing::info!(trigger = %task, tasks = ran, "Hooks finished");
            Ok(())
        }
        Commands::Tasks => print_tasks(&registry, &mut stdout),
        Commands::Config(ConfigCommands::Check) => check_config(&config, &mut stdout),
    }
}

fn print_tasks(registry: &TaskRegistry, out: &mut dyn Write) -> Result<()> {
    let width = registry
        .tasks()
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);

    for task in registry.tasks() {
        writeln!(out, "{:<width$}  # {}", task.name, task.description, width = width)?;
    }
    Ok(())
}

fn check_config(config: &Config, out: &mut dyn Write) -> Result<()> {
    let mail = &config.notifier.mail;
    let from = mail.sender()?;
    let to = mail.recipients()?;

    writeln!(out, "from:    {}", from)?;
    writeln!(
        out,
        "to:      {}",
        to.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )?;
    writeln!(out, "method:  {}", mail.method)?;
    match resolve_link_prefix(mail) {
        Ok(prefix) => writeln!(out, "links:   {}", prefix)?,
        Err(e) => writeln!(out, "links:   disabled ({})", e)?,
    }
    writeln!(out, "Configuration OK")?;
    Ok(())
}
