use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "planwell",
    version,
    about = "Planwell: calendar views, conflicts and recurrences from planner snapshots",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Materialize a calendar view from a snapshot.
    View(ViewArgs),
    /// Expand a recurrence pattern into occurrence instants.
    Occurrences(OccurrenceArgs),
    /// Print the days a view covers.
    Window(WindowArgs),
    /// List conflicting pairs on one day.
    Conflicts(ConflictArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Conflict resolutions (JSON array or JSON lines).
    #[arg(long)]
    pub ignore: Option<PathBuf>,

    /// day, week, month or schedule. Defaults to the configured view.
    #[arg(long)]
    pub view: Option<String>,

    #[arg(long, default_value = "today")]
    pub date: String,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub json: bool,

    /// Also write the view as JSON to this file.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct OccurrenceArgs {
    /// Start date or RFC 3339 instant.
    #[arg(long)]
    pub start: String,

    #[arg(long, default_value = "weekly")]
    pub frequency: String,

    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    pub interval: i64,

    /// pre-generated or on-completion.
    #[arg(long = "type", default_value = "pre-generated")]
    pub kind: String,

    #[arg(long)]
    pub end: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    #[arg(long)]
    pub view: Option<String>,

    #[arg(long, default_value = "today")]
    pub date: String,
}

#[derive(Args, Debug, Clone)]
pub struct ConflictArgs {
    #[arg(long)]
    pub snapshot: PathBuf,

    #[arg(long)]
    pub ignore: Option<PathBuf>,

    #[arg(long, default_value = "today")]
    pub date: String,

    #[arg(long)]
    pub user: Option<String>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
