use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitden_server::config::{Config, loader};
use gitden_server::logs::{self, DEFAULT_TAIL_LINES};
use gitden_server::repository::{self, REPO_SUFFIX, RepositoryStorage};
use gitden_server::workspace::{self, REACHABILITY_TIMEOUT, RemoteChange};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitden")]
#[command(about = "gitden - a small self-hosted git server over SSH", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $GITDEN_CONFIG_PATH or ~/.gitden/config.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SSH server in the foreground
    Serve,
    /// Start the server in the background
    Start,
    /// Stop the background server
    Stop,
    /// Restart the background server
    Restart,
    /// Show whether the background server is running
    Status,
    /// List repositories
    List,
    /// Archive a repository into the backup directory
    Backup {
        /// Repository name, with or without the .git suffix
        name: String,
    },
    /// Delete a repository
    Remove {
        /// Repository name, with or without the .git suffix
        name: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the server log
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long = "tail", default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,
        /// Keep printing new lines as they are written
        #[arg(short, long)]
        follow: bool,
    },
    /// Print the effective configuration
    Config,
    /// Initialize the current directory and point `origin` at the server
    Init,
    /// Clone a repository from the server
    #[command(name = "clone")]
    CloneRepo {
        /// Repository name; pick from a list when omitted
        name: Option<String>,
        /// Directory to clone into
        target: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();
    let (config, config_path) = load_config(cli.config.as_deref())?;
    tracing::debug!(path = %config_path.display(), "loaded configuration");

    match cli.command {
        Commands::Serve => gitden_server::serve(config, CancellationToken::new()).await?,
        Commands::Start => start(&config, cli.config.as_deref())?,
        Commands::Stop => stop(&config)?,
        Commands::Restart => restart(&config, cli.config.as_deref())?,
        Commands::Status => status(&config)?,
        Commands::List => list(&config)?,
        Commands::Backup { name } => backup(&config, &name).await?,
        Commands::Remove { name, yes } => remove(&config, &name, yes).await?,
        Commands::Logs { lines, follow } => show_logs(&config, lines, follow).await?,
        Commands::Init => init(&config).await?,
        Commands::CloneRepo { name, target } => clone(&config, name, target.as_deref()).await?,
        Commands::Config => {
            println!("# {}", config_path.display());
            println!("{}", loader::to_ron(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf)> {
    match path {
        Some(path) => Ok((loader::load_from_file(path)?, path.to_path_buf())),
        None => loader::load_with_discovery(),
    }
}

#[cfg(unix)]
fn start(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let pid = gitden_server::daemon::start(config, config_path)?;
    println!("Server started (PID: {pid})");
    Ok(())
}

#[cfg(unix)]
fn stop(config: &Config) -> Result<()> {
    gitden_server::daemon::stop(config)?;
    println!("Server stopped");
    Ok(())
}

#[cfg(unix)]
fn restart(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let pid = gitden_server::daemon::restart(config, config_path)?;
    println!("Server restarted (PID: {pid})");
    Ok(())
}

#[cfg(unix)]
fn status(config: &Config) -> Result<()> {
    use gitden_server::daemon::DaemonStatus;

    match gitden_server::daemon::status(config) {
        DaemonStatus::Running(pid) => println!("Server is running (PID: {pid})"),
        DaemonStatus::Stopped => println!("Server is not running"),
    }
    Ok(())
}

#[cfg(not(unix))]
fn start(_config: &Config, _config_path: Option<&Path>) -> Result<()> {
    anyhow::bail!("background mode is only supported on unix; use `gitden serve`")
}

#[cfg(not(unix))]
fn stop(_config: &Config) -> Result<()> {
    anyhow::bail!("background mode is only supported on unix")
}

#[cfg(not(unix))]
fn restart(_config: &Config, _config_path: Option<&Path>) -> Result<()> {
    anyhow::bail!("background mode is only supported on unix; use `gitden serve`")
}

#[cfg(not(unix))]
fn status(_config: &Config) -> Result<()> {
    anyhow::bail!("background mode is only supported on unix")
}

fn list(config: &Config) -> Result<()> {
    let repos = repository::list_repositories(&config.repos_dir)?;
    if repos.is_empty() {
        println!("No repositories found");
        return Ok(());
    }

    println!("Repositories in {}:", config.repos_dir.display());
    for repo in repos {
        println!("  {repo}");
        println!("    Path: {}", config.repos_dir.join(&repo).display());
    }
    Ok(())
}

async fn backup(config: &Config, name: &str) -> Result<()> {
    println!("Creating backup of '{name}'...");
    let archive = repository::backup_repository(config, name).await?;
    println!(
        "Backup created: {} ({:.2} MB)",
        archive.path.display(),
        archive.size_mib()
    );
    Ok(())
}

async fn remove(config: &Config, name: &str, yes: bool) -> Result<()> {
    if !yes && !confirm(&format!("Remove repository '{name}'? (y/N): "))? {
        println!("Cancelled");
        return Ok(());
    }

    let storage = RepositoryStorage::from_config(config);
    let removed = storage.remove_repository(name).await?;
    println!("Repository '{}' removed", removed.relative.display());
    Ok(())
}

async fn init(config: &Config) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let report = workspace::init_workspace(config, &cwd).await?;

    if report.initialized {
        println!("Initialized git repository");
    } else {
        println!("Git repository already initialized");
    }
    match report.remote {
        RemoteChange::Added => println!("Added 'origin' remote"),
        RemoteChange::Updated => println!("Updated 'origin' remote"),
    }

    println!("\nRepository initialized: {}", report.name);
    println!("Remote: {}\n", report.url);
    println!("Next steps:");
    println!("  1. Add files:       git add .");
    println!("  2. Commit:          git commit -m \"Initial commit\"");
    println!(
        "  3. Push to server:  git push -u origin {}",
        config.default_branch
    );

    println!("\nChecking gitden server...");
    if workspace::server_reachable(config, REACHABILITY_TIMEOUT).await {
        println!("Server is running and reachable");
    } else {
        println!("Server not reachable. Start it with:");
        println!("  gitden start    # on {}", config.server_host);
    }
    Ok(())
}

async fn clone(config: &Config, name: Option<String>, target: Option<&Path>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => pick_repository(config)?,
    };
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let target = workspace::clone_repository(config, &name, &cwd, target).await?;
    println!("Cloned into {}", target.display());
    Ok(())
}

fn pick_repository(config: &Config) -> Result<String> {
    let repos = repository::list_repositories(&config.repos_dir)?;
    if repos.is_empty() {
        anyhow::bail!("no repositories found");
    }

    println!("Available repositories:");
    for (index, repo) in repos.iter().enumerate() {
        println!(
            "  {}. {}",
            index + 1,
            repo.strip_suffix(REPO_SUFFIX).unwrap_or(repo)
        );
    }
    print!("\nSelect repository (number): ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read input")?;
    select(&repos, answer.trim())
}

fn select(repos: &[String], answer: &str) -> Result<String> {
    match answer.parse::<usize>() {
        Ok(choice) if (1..=repos.len()).contains(&choice) => Ok(repos[choice - 1].clone()),
        _ => anyhow::bail!("invalid selection"),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn show_logs(config: &Config, lines: usize, follow: bool) -> Result<()> {
    let path = config.log_file();
    for line in logs::tail(&path, lines).await? {
        println!("{line}");
    }

    if follow {
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });
        let mut stdout = tokio::io::stdout();
        logs::follow(&path, &mut stdout, shutdown).await?;
    }
    Ok(())
}
