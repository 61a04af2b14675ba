use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mcpanel_core::proto::{BackupMode, BackupScheduleConfig, ErrorBody, LogEvent, LogStream};
use mcpanel_utils::{data_paths, ensure_dir};
use tokio::sync::broadcast;
use tracing::{info, warn};

mod audit;
mod backup;
mod config;
mod console;
mod context;
mod lock;
mod settings;
mod supervisor;

use context::AppContext;

#[derive(Parser)]
#[command(name = "mcpaneld", version = env!("MCPANEL_BUILD_VERSION"))]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Supervise the server and run scheduled backups until Ctrl-C.
    Serve {
        #[arg(long)]
        autostart: bool,
    },
    Backup {
        #[command(subcommand)]
        cmd: BackupCmd,
    },
    Schedule {
        #[command(subcommand)]
        cmd: ScheduleCmd,
    },
    /// Send one command over RCON and print the reply.
    Rcon {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum BackupCmd {
    List,
    Create {
        #[arg(long, value_name = "MODE", default_value = "world")]
        mode: BackupMode,
    },
    /// Stop the server, replace the instance with an archive, start it again.
    Restore {
        id: String,
    },
    Prune,
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ScheduleCmd {
    Show,
    /// Replace the schedule with a JSON document.
    Set {
        json: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let data = data_paths();
    ensure_dir(&data.data_dir)
        .with_context(|| format!("failed to create {}", data.data_dir.display()))?;

    let config = config::load_config(&data.config_path, env_var).map_err(anyhow::Error::msg)?;

    match args.cmd {
        Cmd::Serve { autostart } => serve(config, &data, autostart).await,
        Cmd::Backup { cmd } => {
            let ctx = AppContext::build(config, &data).await.map_err(report)?;
            run_backup(&ctx, &data, cmd).await
        }
        Cmd::Schedule { cmd } => {
            let ctx = AppContext::build(config, &data).await.map_err(report)?;
            run_schedule(&ctx, cmd).await
        }
        Cmd::Rcon { command } => {
            let ctx = AppContext::build(config, &data).await.map_err(report)?;
            let reply = ctx
                .rcon
                .exec(&command.join(" "))
                .await
                .map_err(|e| report(e.into()))?;
            println!("{reply}");
            Ok(())
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

async fn run_backup(ctx: &AppContext, data: &mcpanel_utils::DataPaths, cmd: BackupCmd) -> anyhow::Result<()> {
    match cmd {
        BackupCmd::List => {
            let backups = ctx.engine.list_backups().await.map_err(report)?;
            println!("{}", console::format_backups(&backups));
        }
        BackupCmd::Create { mode } => {
            let info = ctx.engine.create_backup(mode).await.map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        BackupCmd::Restore { id } => {
            // `serve` owns the server while it holds the lock.
            let Some(_lock) = lock::acquire_lock(&data.lock_path)
                .with_context(|| format!("failed to lock {}", data.lock_path.display()))?
            else {
                anyhow::bail!("mcpaneld serve is running, use !restore on its console");
            };
            ctx.engine.restore_backup(&id).await.map_err(report)?;
            // The restarted server would outlive this command unsupervised.
            ctx.supervisor
                .stop_and_wait(ctx.config.stop_grace())
                .await
                .map_err(report)?;
            println!("restored {id}");
        }
        BackupCmd::Prune => {
            let retention = ctx.engine.apply_retention().await.map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&retention)?);
        }
        BackupCmd::Delete { id } => {
            ctx.engine.delete_backup(&id).await.map_err(report)?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

async fn run_schedule(ctx: &AppContext, cmd: ScheduleCmd) -> anyhow::Result<()> {
    match cmd {
        ScheduleCmd::Show => {
            let config = ctx.scheduler.init(env_var).await.map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ScheduleCmd::Set { json } => {
            let config: BackupScheduleConfig =
                serde_json::from_str(&json).context("schedule must be a JSON object")?;
            ctx.scheduler.update_scheduler(config).await.map_err(report)?;
            println!("schedule saved");
        }
    }
    Ok(())
}

async fn serve(config: config::DaemonConfig, data: &mcpanel_utils::DataPaths, autostart: bool) -> anyhow::Result<()> {
    let Some(_lock) = lock::acquire_lock(&data.lock_path)
        .with_context(|| format!("failed to lock {}", data.lock_path.display()))?
    else {
        warn!("mcpaneld already running (lock held), exiting");
        return Ok(());
    };

    let ctx = Arc::new(AppContext::build(config, data).await.map_err(report)?);
    tokio::spawn(print_logs(ctx.supervisor.subscribe_logs()));

    ctx.scheduler.init(env_var).await.map_err(report)?;
    ctx.scheduler.start().await.map_err(report)?;

    if autostart {
        ctx.supervisor.start().await.map_err(report)?;
    }
    info!("mcpaneld ready, type !help for console commands");

    let console_ctx = ctx.clone();
    tokio::select! {
        result = async move { console::run_console(&console_ctx).await } => {
            if let Err(err) = result {
                warn!("console closed: {err}");
            }
            info!("stdin closed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    ctx.supervisor
        .stop_and_wait(ctx.config.stop_grace())
        .await
        .map_err(report)?;
    Ok(())
}

async fn print_logs(mut rx: broadcast::Receiver<LogEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.stream {
                LogStream::Stdout => println!("{}", event.line),
                LogStream::Stderr => eprintln!("{}", event.line),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("log output lagged, {skipped} lines skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Render a core error as its stable `{code, message}` body.
fn report(err: mcpanel_core::CoreError) -> anyhow::Error {
    let body = ErrorBody::from(err);
    match serde_json::to_string(&body) {
        Ok(json) => anyhow::anyhow!(json),
        Err(_) => anyhow::anyhow!(body.message),
    }
}
