mod claim_cmds;
mod config;
mod context;
mod plan_cmds;
mod renumber_cmd;
mod resolve;
mod run_cmd;
mod workspace_cmds;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};

use plank_store::{PlanStatus, Priority};

use config::Overrides;
use context::AppContext;

#[derive(Parser)]
#[command(
    name = "plank",
    version,
    about = "Plan repository manager for coding agents"
)]
struct Cli {
    /// Plan files directory (overrides PLANK_TASKS_DIR)
    #[arg(long, global = true)]
    tasks_dir: Option<PathBuf>,

    /// Data directory for claims and workspaces (overrides PLANK_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// User name recorded on claims and locks (overrides PLANK_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the tasks directory and write a config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create a new plan
    Add {
        /// Plan title
        title: String,
        #[arg(long, default_value = "")]
        goal: String,
        #[arg(long, default_value = "")]
        details: String,
        /// low, medium, high, urgent, or maybe
        #[arg(long)]
        priority: Option<Priority>,
        /// Parent plan (id or file)
        #[arg(long)]
        parent: Option<String>,
        /// Plans this one depends on (ids or files)
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
        /// Add a simple task (repeatable)
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
    /// List plans
    List {
        /// Only plans with this status
        #[arg(long)]
        status: Option<PlanStatus>,
        /// Include done and cancelled plans
        #[arg(long)]
        all: bool,
    },
    /// Show one plan with its tasks
    Show {
        /// Plan id or file
        plan: String,
    },
    /// Find the next plan ready to work on under a parent plan
    Ready {
        /// Plan id or file
        plan: String,
    },
    /// Change a plan's status
    SetStatus {
        /// Plan id or file
        plan: String,
        /// pending, in_progress, done, cancelled, or deferred
        status: PlanStatus,
        /// Mark remaining tasks done when setting `done`
        #[arg(long)]
        force: bool,
    },
    /// Mark a plan done
    Done {
        /// Plan id or file
        plan: String,
        /// Mark remaining tasks done
        #[arg(long)]
        force: bool,
    },
    /// Check plan files for inconsistencies and repair parent links
    Validate {
        /// Report without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve duplicate ids and reorder disordered plan families
    Renumber {
        /// Show the changes without writing
        #[arg(long)]
        dry_run: bool,
        /// Plan files that must keep their id (repeatable)
        #[arg(long)]
        keep: Vec<PathBuf>,
    },
    /// Claim a plan for a workspace
    Claim {
        /// Plan id or file
        plan: String,
        /// Workspace path (defaults to the current repository)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Release a plan claim
    Release {
        /// Plan id or file
        plan: String,
        /// Workspace path (defaults to the current repository)
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Release the claim for every workspace
        #[arg(long, conflicts_with = "workspace")]
        all: bool,
    },
    /// Workspace management
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Lock a workspace, claim a plan, and run an agent command in it
    Run {
        /// Plan id or file
        plan: String,
        /// Workspace to run in (defaults to the current repository)
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// List registered workspaces for this repository
    List {
        /// Include workspaces of every repository
        #[arg(long)]
        all: bool,
    },
    /// Register an existing checkout as a workspace
    Add {
        path: PathBuf,
    },
    /// Forget a workspace (files are left alone)
    Remove {
        path: PathBuf,
    },
    /// Take a persistent lock on a workspace
    Lock {
        /// Workspace path (defaults to the current repository)
        path: Option<PathBuf>,
    },
    /// Release a workspace lock
    Unlock {
        /// Workspace path (defaults to the current repository)
        path: Option<PathBuf>,
        /// Remove the lock regardless of holder
        #[arg(long)]
        force: bool,
    },
    /// Pick an idle workspace for a plan and check out its branch
    Reuse {
        /// Plan id or file
        plan: String,
        /// Create a new worktree instead of reusing one
        #[arg(long)]
        create: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "plank", &mut std::io::stdout());
        return Ok(());
    }

    let overrides = Overrides {
        tasks_dir: cli.tasks_dir,
        data_dir: cli.data_dir,
        user: cli.user,
    };
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let mut ctx = AppContext::new(&overrides, cwd)?;

    match cli.command {
        Commands::Init { force } => plan_cmds::cmd_init(&ctx, force),
        Commands::Add {
            title,
            goal,
            details,
            priority,
            parent,
            depends_on,
            tasks,
        } => {
            let args = plan_cmds::AddArgs {
                title,
                goal,
                details,
                priority,
                parent,
                depends_on,
                tasks,
            };
            plan_cmds::cmd_add(&mut ctx, args)
        }
        Commands::List { status, all } => plan_cmds::cmd_list(&mut ctx, status, all),
        Commands::Show { plan } => plan_cmds::cmd_show(&mut ctx, &plan),
        Commands::Ready { plan } => plan_cmds::cmd_ready(&mut ctx, &plan),
        Commands::SetStatus {
            plan,
            status,
            force,
        } => plan_cmds::cmd_set_status(&mut ctx, &plan, status, force),
        Commands::Done { plan, force } => {
            plan_cmds::cmd_set_status(&mut ctx, &plan, PlanStatus::Done, force)
        }
        Commands::Validate { dry_run } => plan_cmds::cmd_validate(&mut ctx, dry_run),
        Commands::Renumber { dry_run, keep } => renumber_cmd::run_renumber(&mut ctx, dry_run, keep),
        Commands::Claim { plan, workspace } => {
            claim_cmds::cmd_claim(&mut ctx, &plan, workspace.as_deref())
        }
        Commands::Release {
            plan,
            workspace,
            all,
        } => claim_cmds::cmd_release(&mut ctx, &plan, workspace.as_deref(), all),
        Commands::Workspace { command } => workspace_cmds::run_workspace_command(&mut ctx, command),
        Commands::Run {
            plan,
            workspace,
            command,
        } => run_cmd::run_agent(&mut ctx, &plan, workspace.as_deref(), &command).await,
        Commands::Completions { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_requires_command_after_separator() {
        let parsed = Cli::try_parse_from(["plank", "run", "4", "--", "agent", "--fast"]).unwrap();
        match parsed.command {
            Commands::Run { plan, command, .. } => {
                assert_eq!(plan, "4");
                assert_eq!(command, vec!["agent".to_string(), "--fast".to_string()]);
            }
            _ => panic!("expected run command"),
        }
        assert!(Cli::try_parse_from(["plank", "run", "4"]).is_err());
    }

    #[test]
    fn status_is_parsed_with_typed_errors() {
        let parsed = Cli::try_parse_from(["plank", "set-status", "2", "in_progress"]).unwrap();
        assert!(matches!(
            parsed.command,
            Commands::SetStatus {
                status: PlanStatus::InProgress,
                ..
            }
        ));
        let err = Cli::try_parse_from(["plank", "set-status", "2", "blocked"])
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("invalid plan status"), "{err}");
    }
}
