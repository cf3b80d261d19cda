use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use billing_core::{SortDirection, TableConfig};
use billing_engine::{
    ensure_output_dir, ApiGateway, AtomicFileWriter, ExtraParams, PollSettings, TableBinder,
    TaskOutcome, TaskPoller, TaskStatus,
};
use billing_logging::{billing_debug, billing_info};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::cli::{BrowseArgs, LoginArgs, PollArgs, RunArgs, TaskArgs};
use crate::persistence::FileCredentialStore;
use crate::ui::input::{self, BrowseCommand};
use crate::ui::render::TerminalSurface;

/// Everything a command handler needs.
pub struct App {
    pub gateway: Arc<ApiGateway>,
    pub store: Arc<FileCredentialStore>,
    /// Set by the logout hook when the gateway drops the session.
    pub session_ended: watch::Receiver<bool>,
}

#[derive(Debug, PartialEq, Eq)]
enum FirstFrame {
    Painted,
    SessionEnded,
    TimedOut,
}

impl App {
    pub async fn login(&self, args: LoginArgs) -> Result<()> {
        let password = match args.password {
            Some(password) => password,
            None => read_password().await?,
        };
        self.gateway
            .login(&args.username, &password)
            .await
            .context("sign-in failed")?;
        println!("Signed in as {}.", args.username);
        Ok(())
    }

    pub fn logout(&self) {
        if self.gateway.is_authenticated() {
            self.gateway.logout();
        } else {
            println!("No stored session.");
        }
    }

    pub fn status(&self) {
        println!("API:      {}", self.gateway.settings().base_url);
        println!("Session:  {}", self.store.path().display());
        match self.store.saved_at() {
            Some(saved_at) if self.gateway.is_authenticated() => {
                println!("Signed in since {}", saved_at.format("%Y-%m-%d %H:%M UTC"));
            }
            _ => println!("Not signed in"),
        }
    }

    pub async fn browse(&self, args: BrowseArgs) -> Result<()> {
        let config = TableConfig {
            page: args.page.max(1),
            limit: args.limit.max(1),
            search: args.search.clone(),
            sort_field: args.sort_by.clone(),
            sort_direction: if args.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
            ..TableConfig::default()
        };
        let extras: Option<ExtraParams> = if args.filters.is_empty() {
            None
        } else {
            let filters = args.filters.clone();
            let extras: ExtraParams = Arc::new(move || filters.clone());
            Some(extras)
        };

        let (painted_tx, mut painted_rx) = mpsc::unbounded_channel();
        let surface = TerminalSurface::new(Box::new(std::io::stdout()), args.columns.clone())
            .notify_painted(painted_tx);
        let binder: TableBinder<Value> = TableBinder::spawn(
            self.gateway.clone(),
            args.endpoint.clone(),
            extras,
            Box::new(surface),
            config,
        );

        let mut session = self.session_ended.clone();
        let deadline = self.gateway.settings().request_timeout + Duration::from_secs(5);
        match first_frame(&mut painted_rx, &mut session, deadline).await {
            FirstFrame::Painted => {}
            FirstFrame::SessionEnded => bail!("not signed in"),
            FirstFrame::TimedOut => bail!("no response from {}", args.endpoint),
        }
        if args.once {
            return Ok(());
        }

        println!("{}", input::HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                biased;
                Ok(_) = session.wait_for(|ended| *ended) => {
                    binder.shutdown();
                    bail!("session ended");
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            let command = match input::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(message) => {
                    eprintln!("{message}");
                    continue;
                }
            };
            billing_debug!("Browse command {:?}", command);
            match command {
                BrowseCommand::Page(delta) => binder.change_page(delta),
                BrowseCommand::Search(text) => binder.search_input(text),
                BrowseCommand::Sort(field) => binder.sort_by(field),
                BrowseCommand::Limit(limit) => binder.set_limit(limit),
                BrowseCommand::Refresh => binder.refresh(),
                BrowseCommand::Help => println!("{}", input::HELP),
                BrowseCommand::Quit => break,
            }
        }
        binder.shutdown();
        Ok(())
    }

    pub async fn task(&self, args: TaskArgs) -> Result<()> {
        let outcome = self.wait_for(&args.task_id, &args.poll).await?;
        self.finish(outcome, &args.poll).await
    }

    /// Starts a server job and follows it to the end.
    pub async fn run(&self, args: RunArgs) -> Result<()> {
        let body: BTreeMap<String, Value> = args
            .params
            .iter()
            .map(|(key, value)| (key.clone(), param_value(value)))
            .collect();
        let reply: Value = self
            .gateway
            .post_json(&args.endpoint, &body)
            .await
            .with_context(|| format!("could not start {}", args.endpoint))?;
        let task_id = task_id_of(&reply)
            .ok_or_else(|| anyhow!("{} did not return a task id: {reply}", args.endpoint))?;
        billing_info!("Started task {} via {}", task_id, args.endpoint);
        println!("Started task {task_id}");

        let outcome = self.wait_for(&task_id, &args.poll).await?;
        self.finish(outcome, &args.poll).await
    }

    async fn wait_for(&self, task_id: &str, poll: &PollArgs) -> Result<TaskOutcome> {
        let settings = PollSettings {
            interval: Duration::from_secs(poll.interval_secs.max(1)),
            max_attempts: poll.max_attempts.max(1),
        };
        let poller = TaskPoller::new(self.gateway.clone(), settings);
        let mut stderr = std::io::stderr();
        let outcome = poller
            .poll_with_progress(task_id, |status| report_progress(&mut stderr, status))
            .await;
        eprintln!();
        outcome.with_context(|| format!("task {task_id}"))
    }

    async fn finish(&self, outcome: TaskOutcome, poll: &PollArgs) -> Result<()> {
        println!("Task {} finished.", outcome.task_id);
        if let Some(result) = &outcome.result {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        let Some(url) = &outcome.download_url else {
            return Ok(());
        };
        let Some(dir) = &poll.download_dir else {
            println!("Result file: {url}");
            return Ok(());
        };
        ensure_output_dir(dir)?;
        let writer = AtomicFileWriter::new(dir.clone());
        let filename = download_name(url, &outcome.task_id);
        let saved = self.gateway.download(url, &writer, &filename).await?;
        println!("Saved {}", saved.display());
        Ok(())
    }
}

/// Waits for the table's first paint. An expired session never paints, so
/// the logout signal and a deadline end the wait too.
async fn first_frame(
    painted: &mut mpsc::UnboundedReceiver<()>,
    session: &mut watch::Receiver<bool>,
    deadline: Duration,
) -> FirstFrame {
    tokio::select! {
        biased;
        Ok(_) = session.wait_for(|ended| *ended) => FirstFrame::SessionEnded,
        painted = painted.recv() => match painted {
            Some(()) => FirstFrame::Painted,
            None => FirstFrame::TimedOut,
        },
        _ = tokio::time::sleep(deadline) => FirstFrame::TimedOut,
    }
}

async fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("no password given"))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn report_progress(out: &mut impl Write, status: &TaskStatus) {
    let _ = match status.progress {
        Some(progress) => write!(out, "\r{} {:>5.1}%", status.status, progress),
        None => write!(out, "\r{}...", status.status),
    };
    let _ = out.flush();
}

/// Numbers and booleans go to the server typed; everything else as text.
fn param_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn task_id_of(reply: &Value) -> Option<String> {
    ["task_id", "id"]
        .iter()
        .find_map(|key| match reply.get(key)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

/// Last path segment of the download url, or a name derived from the task.
fn download_name(url: &str, task_id: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("task-{task_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::persistence::TerminalLogoutHook;
    use billing_engine::LogoutHook;
    use std::time::Instant;

    #[tokio::test]
    async fn first_frame_ends_when_session_expires() {
        let hook = Arc::new(TerminalLogoutHook::new());
        let mut session = hook.subscribe();
        let (_painted_tx, mut painted_rx) = mpsc::unbounded_channel();

        let expire = hook.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            expire.on_logout();
        });

        let started = Instant::now();
        let outcome = first_frame(&mut painted_rx, &mut session, Duration::from_secs(35)).await;

        assert_eq!(outcome, FirstFrame::SessionEnded);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn first_frame_sees_paint_and_deadline() {
        let hook = TerminalLogoutHook::new();
        let mut session = hook.subscribe();

        let (painted_tx, mut painted_rx) = mpsc::unbounded_channel();
        painted_tx.send(()).unwrap();
        let outcome = first_frame(&mut painted_rx, &mut session, Duration::from_secs(35)).await;
        assert_eq!(outcome, FirstFrame::Painted);

        let outcome = first_frame(&mut painted_rx, &mut session, Duration::from_millis(10)).await;
        assert_eq!(outcome, FirstFrame::TimedOut);
    }

    #[test]
    fn task_id_accepts_strings_and_numbers() {
        assert_eq!(task_id_of(&json!({"task_id": "a1"})).as_deref(), Some("a1"));
        assert_eq!(task_id_of(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(task_id_of(&json!({"task_id": ""})), None);
        assert_eq!(task_id_of(&json!({"status": "queued"})), None);
    }

    #[test]
    fn params_keep_numbers_typed() {
        assert_eq!(param_value("7"), json!(7));
        assert_eq!(param_value("true"), json!(true));
        assert_eq!(param_value("2024-05"), json!("2024-05"));
        assert_eq!(param_value("March"), json!("March"));
    }

    #[test]
    fn download_name_uses_last_segment() {
        assert_eq!(
            download_name("/files/report-1.xlsx?sig=abc", "t1"),
            "report-1.xlsx"
        );
        assert_eq!(
            download_name("https://cdn.example.com/archive.zip", "t1"),
            "archive.zip"
        );
        assert_eq!(download_name("/files/", "t1"), "files");
        assert_eq!(download_name("", "t1"), "task-t1");
    }

    #[test]
    fn progress_overwrites_the_line() {
        let status = TaskStatus {
            status: "PROGRESS".to_string(),
            result: None,
            download_url: None,
            error: None,
            progress: Some(42.0),
        };
        let mut out = Vec::new();
        report_progress(&mut out, &status);
        assert_eq!(String::from_utf8(out).unwrap(), "\rPROGRESS  42.0%");
    }
}
