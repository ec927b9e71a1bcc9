//! Branchline CLI
//!
//! The `branchline` command drives the commit graph of a remote repository
//! configured through `GITHUB_OWNER`, `GITHUB_REPO` and `GITHUB_TOKEN`.
//!
//! ## Commands
//!
//! - `commit`: Commit local files onto a branch under `Files/`
//! - `cherry-pick`: Replay commits onto a branch, directly or through a review
//! - `approve`: Approve and merge a cherry-pick review
//! - `promote`: Promote dev -> uat -> main, or selected dev commits into uat
//! - `branch`: Show or create branches
//! - `audit`: Show the local audit log

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use branchline_core::{
    sanitize_file_name, Branchline, Change, CherryPickRequest, CommitRequest, Stage,
    StageBranches, UPLOAD_PREFIX,
};
use branchline_store::{AuditSink, CommitId, GithubStore, JsonFileAuditLog, MergeMethod};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "branchline")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Commit, cherry-pick and promote across a remote commit graph", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Audit log file
    #[arg(long, global = true, env = "BRANCHLINE_AUDIT_LOG", default_value = "audit.json")]
    audit_log: PathBuf,

    /// Branch backing the dev stage
    #[arg(long, global = true, env = "BRANCHLINE_DEV_BRANCH", default_value = "dev")]
    dev_branch: String,

    /// Branch backing the uat stage
    #[arg(long, global = true, env = "BRANCHLINE_UAT_BRANCH", default_value = "uat")]
    uat_branch: String,

    /// Branch backing the main stage
    #[arg(long, global = true, env = "BRANCHLINE_MAIN_BRANCH", default_value = "main")]
    main_branch: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit local files onto a branch as `Files/<name>`
    Commit {
        /// Files to commit
        files: Vec<PathBuf>,

        /// Repository paths to delete in the same commit
        #[arg(long = "delete")]
        delete: Vec<String>,

        /// Branch to commit to
        #[arg(short, long, default_value = "dev")]
        branch: String,

        /// Commit message
        #[arg(short, long, default_value = "Commit from CLI")]
        message: String,

        /// Refuse to commit unless the branch tip is this commit
        #[arg(long)]
        expected_tip: Option<String>,
    },

    /// Cherry-pick commits onto a branch
    CherryPick {
        /// Commits to pick, applied in the given order
        #[arg(required = true)]
        commits: Vec<String>,

        /// Branch to pick onto
        #[arg(short, long)]
        target: String,

        /// Pick onto an ephemeral branch and open a review instead
        #[arg(long)]
        review: bool,
    },

    /// Approve and merge a cherry-pick review
    Approve {
        /// Review request number
        review: u64,

        /// Ephemeral branch the review was opened from; checked when given
        #[arg(long)]
        branch: Option<String>,

        /// merge, squash or rebase
        #[arg(long, default_value = "merge")]
        method: MergeMethod,
    },

    /// Promote a stage into the next one
    Promote {
        /// Stage to promote from (dev or uat)
        #[arg(default_value = "dev")]
        stage: Stage,

        /// Promote only these dev commits into uat, one by one
        #[arg(long = "commit")]
        commits: Vec<String>,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Show the most recent audit records
    Audit {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Show a branch's head commit
    Show { name: String },

    /// Create a branch at another branch's tip
    Create {
        name: String,

        #[arg(short, long, default_value = "main")]
        from: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    branchline_core::init_tracing(cli.json, level);

    let audit = Arc::new(JsonFileAuditLog::new(&cli.audit_log));
    if let Commands::Audit { limit } = cli.command {
        return cmd_audit(audit.as_ref(), limit).await;
    }

    let store = GithubStore::from_env().context("Failed to configure the GitHub object store")?;
    debug!(
        owner = %store.config().owner,
        repo = %store.config().repo,
        "using remote repository"
    );

    let branches = StageBranches {
        dev: cli.dev_branch,
        uat: cli.uat_branch,
        main: cli.main_branch,
    };
    let core = Branchline::new(Arc::new(store), audit.clone(), branches);

    match cli.command {
        Commands::Commit {
            files,
            delete,
            branch,
            message,
            expected_tip,
        } => {
            cmd_commit(
                &core,
                &branch,
                &files,
                &delete,
                &message,
                expected_tip.map(CommitId::new),
            )
            .await
        }
        Commands::CherryPick {
            commits,
            target,
            review,
        } => cmd_cherry_pick(&core, commits, &target, review).await,
        Commands::Approve {
            review,
            branch,
            method,
        } => cmd_approve(&core, review, branch.as_deref(), method).await,
        Commands::Promote { stage, commits } => cmd_promote(&core, stage, commits).await,
        Commands::Branch { action } => match action {
            BranchAction::Show { name } => cmd_branch_show(&core, &name).await,
            BranchAction::Create { name, from } => cmd_branch_create(&core, &name, &from).await,
        },
        Commands::Audit { limit } => cmd_audit(audit.as_ref(), limit).await,
    }
}

/// Read local files into changes under `Files/`.
async fn file_changes(files: &[PathBuf]) -> Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(files.len());
    for file in files {
        let name = file_name(file)?;
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        changes.push(Change::write(format!("{}/{}", UPLOAD_PREFIX, name), bytes));
    }
    Ok(changes)
}

fn file_name(path: &Path) -> Result<String> {
    let raw = path.to_string_lossy();
    Ok(sanitize_file_name(&raw)?)
}

/// Commit local files and deletions
async fn cmd_commit(
    core: &Branchline,
    branch: &str,
    files: &[PathBuf],
    delete: &[String],
    message: &str,
    expected_tip: Option<CommitId>,
) -> Result<()> {
    let mut changes = file_changes(files).await?;
    changes.extend(delete.iter().map(Change::delete));

    let mut request = CommitRequest::new(branch, changes, message);
    request.expected_tip = expected_tip;
    let outcome = core
        .builder
        .commit_changes(request)
        .await
        .with_context(|| format!("Failed to commit to '{}'", branch))?;

    if outcome.commit_id == outcome.parent {
        println!("Nothing to commit; '{}' stays at {}", branch, outcome.commit_id.short());
    } else {
        println!(
            "[{} {}] {}",
            branch,
            outcome.commit_id.short(),
            message
        );
    }
    Ok(())
}

/// Cherry-pick commits, directly or through a review
async fn cmd_cherry_pick(
    core: &Branchline,
    commits: Vec<String>,
    target: &str,
    review: bool,
) -> Result<()> {
    let request = CherryPickRequest::new(commits.into_iter().map(CommitId::new).collect(), target);

    if review {
        let opened = core
            .reviews
            .open(request)
            .await
            .context("Failed to open cherry-pick review")?;
        println!(
            "Opened review #{} from '{}' into '{}'",
            opened.review.id, opened.branch, target
        );
        if let Some(url) = &opened.review.url {
            println!("  {}", url);
        }
        return Ok(());
    }

    let outcome = core
        .cherry_pick
        .cherry_pick(request)
        .await
        .with_context(|| format!("Failed to cherry-pick onto '{}'", target))?;
    for pick in &outcome.applied {
        let note = if pick.empty { " (empty)" } else { "" };
        println!("{} -> {}{}", pick.source.short(), pick.commit_id.short(), note);
    }
    println!(
        "'{}' advanced {} -> {}",
        target,
        outcome.previous_tip.short(),
        outcome.tip().short()
    );
    Ok(())
}

/// Approve and merge a review
async fn cmd_approve(
    core: &Branchline,
    review: u64,
    branch: Option<&str>,
    method: MergeMethod,
) -> Result<()> {
    let merged = core
        .reviews
        .approve_and_integrate(review, branch, method)
        .await
        .with_context(|| format!("Failed to integrate review #{}", review))?;
    println!("Merged review #{} as {}", review, merged.short());
    Ok(())
}

/// Full or selective promotion
async fn cmd_promote(core: &Branchline, stage: Stage, commits: Vec<String>) -> Result<()> {
    if commits.is_empty() {
        let outcome = core
            .pipeline
            .promote(stage)
            .await
            .with_context(|| format!("Failed to promote {}", stage))?;
        match outcome.merge_commit() {
            Some(commit) => println!(
                "{} merged into {} at {}",
                outcome.source_branch,
                outcome.target_branch,
                commit.short()
            ),
            None => println!("{} is already up to date", outcome.target_branch),
        }
        return Ok(());
    }

    anyhow::ensure!(
        stage == Stage::Dev,
        "selective promotion only runs from dev into uat"
    );
    let result = core
        .pipeline
        .promote_selected(commits.into_iter().map(CommitId::new).collect())
        .await
        .context("Selective promotion failed")?;
    for pick in &result.promoted {
        println!("{} -> {}", pick.source.short(), pick.commit_id.short());
    }
    if let Some(failure) = &result.failure {
        anyhow::bail!(
            "stopped at {} after {} promoted: {}",
            failure.commit.short(),
            result.promoted.len(),
            failure.error
        );
    }
    Ok(())
}

/// Show a branch's head commit
async fn cmd_branch_show(core: &Branchline, name: &str) -> Result<()> {
    let head = core
        .builder
        .branch_head(name)
        .await
        .with_context(|| format!("Failed to read branch '{}'", name))?;
    println!("{} -> {}", name, head.id);
    println!("tree {}", head.tree);
    for parent in &head.parents {
        println!("parent {}", parent);
    }
    println!();
    println!("    {}", head.message);
    Ok(())
}

/// Create a branch
async fn cmd_branch_create(core: &Branchline, name: &str, from: &str) -> Result<()> {
    let snapshot = core
        .builder
        .create_branch(name, from)
        .await
        .with_context(|| format!("Failed to create branch '{}'", name))?;
    println!("Created branch '{}' at {}", name, snapshot.tip.short());
    Ok(())
}

/// Print the last `limit` audit records
async fn cmd_audit(audit: &dyn AuditSink, limit: usize) -> Result<()> {
    let records = audit.records().await.context("Failed to read audit log")?;
    if records.is_empty() {
        println!("No audit records yet.");
        return Ok(());
    }

    let start = records.len().saturating_sub(limit);
    for record in &records[start..] {
        println!(
            "{}  {}  {:<12} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            record.commit_id.short(),
            record.branch,
            record.message
        );
        if !record.files.is_empty() {
            println!("    {}", record.files.join(", "));
        }
    }
    Ok(())
}
