use mcpanel_core::CoreError;
use mcpanel_core::proto::{BackupInfo, BackupMode, ProcessStatus};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::context::AppContext;

/// Control commands typed on the serve console with a leading `!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Logs(usize),
    Start,
    Stop,
    Restart,
    Backups,
    Backup(BackupMode),
    Restore(String),
    Prune,
    Rcon(String),
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    /// Forwarded to the server's stdin as is.
    Server(String),
    Control(ConsoleCommand),
}

pub const HELP: &str = "\
!status            process state and resource usage
!logs [n]          last n lines of server output (default 50)
!start | !stop | !restart
!backups           list archives, newest first
!backup <mode>     create a full or world backup
!restore <id>      restore an archive (stops and restarts the server)
!prune             apply the retention policy
!rcon <command>    send a command over RCON
!schedule          show the automatic backup schedule
anything else is written to the server console";

pub fn parse_line(line: &str) -> Result<ConsoleInput, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.trim_start().strip_prefix('!') else {
        if line.trim().is_empty() {
            return Ok(ConsoleInput::Empty);
        }
        return Ok(ConsoleInput::Server(line.to_string()));
    };

    let (name, arg) = match rest.trim().split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest.trim(), ""),
    };
    let command = match name {
        "help" | "" => ConsoleCommand::Help,
        "status" => ConsoleCommand::Status,
        "logs" if arg.is_empty() => ConsoleCommand::Logs(50),
        "logs" => ConsoleCommand::Logs(arg.parse().map_err(|_| format!("invalid line count: {arg}"))?),
        "start" => ConsoleCommand::Start,
        "stop" => ConsoleCommand::Stop,
        "restart" => ConsoleCommand::Restart,
        "backups" => ConsoleCommand::Backups,
        "backup" => {
            let mode = if arg.is_empty() { "world" } else { arg };
            ConsoleCommand::Backup(mode.parse()?)
        }
        "restore" if !arg.is_empty() => ConsoleCommand::Restore(arg.to_string()),
        "restore" => return Err("usage: !restore <backup id>".into()),
        "prune" => ConsoleCommand::Prune,
        "rcon" if !arg.is_empty() => ConsoleCommand::Rcon(arg.to_string()),
        "rcon" => return Err("usage: !rcon <command>".into()),
        "schedule" => ConsoleCommand::Schedule,
        other => return Err(format!("unknown command !{other}, try !help")),
    };
    Ok(ConsoleInput::Control(command))
}

pub async fn execute(ctx: &AppContext, command: ConsoleCommand) -> Result<String, CoreError> {
    match command {
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Status => Ok(format_status(&ctx.supervisor.get_status().await)),
        ConsoleCommand::Logs(lines) => Ok(ctx
            .supervisor
            .tail_logs(lines)
            .into_iter()
            .map(|event| event.line)
            .collect::<Vec<_>>()
            .join("\n")),
        ConsoleCommand::Start => {
            ctx.supervisor.start().await?;
            Ok("server started".into())
        }
        ConsoleCommand::Stop => {
            ctx.supervisor.stop().await?;
            Ok("stop signal sent".into())
        }
        ConsoleCommand::Restart => {
            ctx.supervisor.restart().await?;
            Ok("server restarted".into())
        }
        ConsoleCommand::Backups => Ok(format_backups(&ctx.engine.list_backups().await?)),
        ConsoleCommand::Backup(mode) => {
            let info = ctx.engine.create_backup(mode).await?;
            Ok(format!("created {} ({} bytes)", info.id, info.size))
        }
        ConsoleCommand::Restore(id) => {
            ctx.engine.restore_backup(&id).await?;
            Ok(format!("restored {id}"))
        }
        ConsoleCommand::Prune => {
            let report = ctx.engine.apply_retention().await?;
            Ok(format!(
                "kept {}, removed {}: {}",
                report.kept.len(),
                report.removed.len(),
                report.removed.join(", ")
            ))
        }
        ConsoleCommand::Rcon(cmd) => Ok(ctx.rcon.exec(&cmd).await?),
        ConsoleCommand::Schedule => {
            let config = ctx.scheduler.current_config().await.unwrap_or_default();
            let jobs = ctx.scheduler.active_job_count().await;
            let body = serde_json::to_string_pretty(&config)
                .map_err(|e| CoreError::Validation(format!("failed to render schedule: {e}")))?;
            Ok(format!("{body}\n{jobs} active job(s)"))
        }
    }
}

/// Read stdin until EOF, dispatching `!` commands and forwarding the rest.
pub async fn run_console(ctx: &AppContext) -> std::io::Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(ConsoleInput::Empty) => {}
            Ok(ConsoleInput::Server(text)) => {
                if let Err(err) = ctx.supervisor.write(&text).await {
                    eprintln!("{err}");
                }
            }
            Ok(ConsoleInput::Control(command)) => match execute(ctx, command).await {
                Ok(output) => println!("{output}"),
                Err(err) => {
                    warn!("console command failed: {err}");
                    eprintln!("{err}");
                }
            },
            Err(err) => eprintln!("{err}"),
        }
    }
    Ok(())
}

pub fn format_status(status: &ProcessStatus) -> String {
    let pid = status
        .pid
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "state={} pid={} uptime={}s cpu={:.1}% mem={}MB",
        status.state,
        pid,
        status.uptime_ms / 1000,
        status.cpu,
        status.mem_mb
    )
}

pub fn format_backups(backups: &[BackupInfo]) -> String {
    if backups.is_empty() {
        return "no backups".to_string();
    }
    backups
        .iter()
        .map(|b| {
            let created = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(b.created_at as i64)
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            format!("{}  {:>12}  {}", b.id, b.size, created)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
