use std::path::PathBuf;

use billing_logging::LogDestination;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "billing",
    version,
    about = "Terminal client for the utility billing back office"
)]
pub struct Cli {
    /// Base url of the billing API.
    #[arg(
        long,
        global = true,
        env = "BILLING_API_URL",
        default_value = "http://127.0.0.1:8000/api"
    )]
    pub base_url: String,

    /// File holding the signed-in session.
    #[arg(
        long,
        global = true,
        env = "BILLING_SESSION_FILE",
        default_value = ".billing_session.ron"
    )]
    pub session_file: PathBuf,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log file; logging goes here so it never mixes with table output.
    #[arg(long, global = true, default_value = "billing.log")]
    pub log_file: PathBuf,

    /// Also log to the terminal.
    #[arg(long, global = true)]
    pub log_to_terminal: bool,

    /// Do not write the log file.
    #[arg(long, global = true)]
    pub no_log_file: bool,

    /// Increase log detail (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// `None` when both the file and the terminal are switched off.
    pub fn log_destination(&self) -> Option<LogDestination> {
        match (self.log_to_terminal, self.no_log_file) {
            (false, false) => Some(LogDestination::File(self.log_file.clone())),
            (true, false) => Some(LogDestination::Both(self.log_file.clone())),
            (true, true) => Some(LogDestination::Terminal),
            (false, true) => None,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and store the bearer token.
    Login(LoginArgs),
    /// Forget the stored session.
    Logout,
    /// Show where the client points and whether a session is stored.
    Status,
    /// Page through a list endpoint.
    Browse(BrowseArgs),
    /// Wait for a server task to finish.
    Task(TaskArgs),
    /// Start a server job (import, report, archive) and wait for it.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    #[arg(short, long)]
    pub username: String,
    /// Read from stdin when omitted.
    #[arg(short, long, env = "BILLING_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Args)]
pub struct BrowseArgs {
    /// List endpoint, e.g. `/readings/drafts`.
    pub endpoint: String,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
    #[arg(long, default_value = "")]
    pub search: String,
    #[arg(long)]
    pub sort_by: Option<String>,
    /// Sort descending.
    #[arg(long, requires = "sort_by")]
    pub desc: bool,
    /// Extra endpoint filter, `key=value`; repeatable.
    #[arg(long = "filter", value_parser = parse_key_value)]
    pub filters: Vec<(String, String)>,
    /// Comma separated columns; defaults to the keys of the first row.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Print the first page and exit instead of reading commands from stdin.
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct PollArgs {
    #[arg(long, default_value_t = 2)]
    pub interval_secs: u64,
    #[arg(long, default_value_t = 150)]
    pub max_attempts: u32,
    /// Save the produced file (if any) into this directory.
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TaskArgs {
    pub task_id: String,
    #[command(flatten)]
    pub poll: PollArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Endpoint that starts the job and answers with its task id.
    pub endpoint: String,
    /// Job parameter, `key=value`; repeatable.
    #[arg(long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,
    #[command(flatten)]
    pub poll: PollArgs,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}
