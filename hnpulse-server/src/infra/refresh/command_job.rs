use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use hnpulse_core::{
    EventLevel, JobError, JobOutcome, JobRequest, ProgressSink, RefreshEvent,
    RefreshJob, RefreshScope,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader, Lines},
    process::{Child, Command},
};
use tracing::{debug, warn};

const ITEM_PLACEHOLDER: &str = "{item_id}";
const URL_PLACEHOLDER: &str = "{url}";

/// How to launch the summary pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommand {
    pub program: String,
    /// Arguments for the daily digest run.
    pub args: Vec<String>,
    /// Arguments for a single-article run. `{item_id}` and `{url}` are
    /// substituted; an argument left empty by substitution is dropped along
    /// with the flag right before it.
    pub adhoc_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Default for PipelineCommand {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: ["-m", "src.main", "--top-n", "30", "--filter-ai"]
                .map(String::from)
                .to_vec(),
            adhoc_args: [
                "-m",
                "src.main",
                "--item-id",
                ITEM_PLACEHOLDER,
                "--url",
                URL_PLACEHOLDER,
            ]
            .map(String::from)
            .to_vec(),
            working_dir: None,
            timeout: Some(Duration::from_secs(60 * 60)),
        }
    }
}

impl PipelineCommand {
    pub fn args_for(&self, request: &JobRequest) -> Vec<String> {
        match &request.scope {
            RefreshScope::Daily => self.args.clone(),
            RefreshScope::Item(id) => {
                let url = request.url.as_deref().unwrap_or_default();
                let mut args: Vec<String> =
                    Vec::with_capacity(self.adhoc_args.len());
                for arg in &self.adhoc_args {
                    let value = arg
                        .replace(ITEM_PLACEHOLDER, id.as_str())
                        .replace(URL_PLACEHOLDER, url);
                    if !value.is_empty() {
                        args.push(value);
                        continue;
                    }
                    // An option whose value came out empty goes with it.
                    let templated = arg.contains(ITEM_PLACEHOLDER)
                        || arg.contains(URL_PLACEHOLDER);
                    if templated
                        && args.last().is_some_and(|prev| is_flag(prev))
                    {
                        args.pop();
                    }
                }
                args
            }
        }
    }
}

fn is_flag(arg: &str) -> bool {
    arg.starts_with('-') && !arg.contains('=') && arg.len() > 1
}

/// Runs the pipeline as a child process and turns its output into progress.
///
/// Stdout and stderr lines become `log` events. Lines in the pipeline's
/// `asctime - logger - LEVEL - message` format keep their level and logger.
#[derive(Debug, Clone)]
pub struct CommandJob {
    command: PipelineCommand,
}

impl CommandJob {
    pub fn new(command: PipelineCommand) -> Self {
        Self { command }
    }

    fn build(&self, request: &JobRequest) -> Command {
        let mut command = Command::new(&self.command.program);
        command
            .args(self.command.args_for(request))
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl RefreshJob for CommandJob {
    async fn run(
        &self,
        request: JobRequest,
        progress: ProgressSink,
    ) -> Result<JobOutcome, JobError> {
        let mut child = self.build(&request).spawn().map_err(|err| {
            warn!(program = %self.command.program, error = %err, "pipeline launch failed");
            JobError::Launch(err)
        })?;
        debug!(pid = child.id(), scope = %request.scope, "pipeline launched");
        progress.stage(
            "launch",
            format!("Pipeline started ({})", self.command.program),
        );

        let status = match self.command.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, drive(&mut child, &progress))
                    .await
                {
                    Ok(status) => status,
                    Err(_) => {
                        if let Err(err) = child.kill().await {
                            warn!(error = %err, "failed to kill timed out pipeline");
                        }
                        return Err(JobError::TimedOut { after: limit });
                    }
                }
            }
            None => drive(&mut child, &progress).await,
        }
        .map_err(JobError::Launch)?;

        progress.stage("exit", format!("Pipeline exited ({status})"));
        if !status.success() {
            return Err(JobError::ExitStatus {
                code: status.code(),
            });
        }

        let outcome = match &request.scope {
            RefreshScope::Daily => JobOutcome::new("Refresh complete"),
            RefreshScope::Item(id) => {
                JobOutcome::new(format!("Summary ready for {id}"))
                    .with_detail("item_id", id.as_str())
            }
        };
        Ok(outcome.with_detail("exit_code", status.code().unwrap_or(0)))
    }
}

/// Forwards output until both pipes close, then reaps the child.
async fn drive(
    child: &mut Child,
    progress: &ProgressSink,
) -> std::io::Result<std::process::ExitStatus> {
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut stderr = child.stderr.take().map(|err| BufReader::new(err).lines());

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => {
                match line {
                    Some(line) => forward(progress, &line, EventLevel::Info),
                    None => stdout = None,
                }
            }
            line = next_line(&mut stderr), if stderr.is_some() => {
                match line {
                    Some(line) => forward(progress, &line, EventLevel::Warning),
                    None => stderr = None,
                }
            }
        }
    }

    child.wait().await
}

async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let reader = lines.as_mut()?;
    match reader.next_line().await {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "pipeline output unreadable");
            None
        }
    }
}

fn forward(progress: &ProgressSink, raw: &str, unstructured: EventLevel) {
    let line = raw.trim_end();
    if line.trim().is_empty() {
        return;
    }
    match parse_log_line(line) {
        Some(parsed) => progress.emit(
            RefreshEvent::log(parsed.level, parsed.message)
                .with_field("logger", parsed.logger),
        ),
        None => progress.log(unstructured, line),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LogLine<'a> {
    level: EventLevel,
    logger: &'a str,
    message: &'a str,
}

/// Parses `2026-05-04 06:00:01,123 - src.main - INFO - Scraping`.
fn parse_log_line(line: &str) -> Option<LogLine<'_>> {
    let mut parts = line.splitn(4, " - ");
    let _timestamp = parts.next()?;
    let logger = parts.next()?;
    let level = match parts.next()? {
        "DEBUG" => EventLevel::Debug,
        "INFO" => EventLevel::Info,
        "WARNING" | "WARN" => EventLevel::Warning,
        "ERROR" | "CRITICAL" => EventLevel::Error,
        _ => return None,
    };
    let message = parts.next()?;
    Some(LogLine {
        level,
        logger,
        message,
    })
}
