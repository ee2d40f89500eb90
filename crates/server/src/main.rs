//! agent-avatar
//!
//! A live activity avatar for AI coding agents. Agent hooks push the current
//! activity to a local server, which broadcasts it to browser and terminal
//! viewers over WebSocket.

mod api;
mod app;
mod cmd_install_hooks;
mod cmd_status;
mod config;
mod gateway;
mod ingress;
mod logging;
mod manifest;
mod notifier;
mod paths;
mod state;
mod store;
mod websocket;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console::style;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use agent_avatar_cli::trigger::{self, SetOutcome};
use agent_avatar_cli::run_viewer;

use crate::config::{AvatarConfig, ConfigLayer};
use crate::logging::LogTarget;
use crate::manifest::resolve_avatar;
use crate::state::AvatarServer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "agent-avatar", version, about = "A live activity avatar for AI coding agents")]
struct Cli {
    /// Data directory (default: ~/.agent-avatar)
    #[arg(long, global = true, env = "AGENT_AVATAR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the config files. Unset flags leave the file values alone.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Avatar name under <data-dir>/avatars, or a path to an avatar directory
    #[arg(long, global = true)]
    avatar: Option<String>,

    /// Terminal animation frame rate
    #[arg(long, global = true)]
    frame_rate: Option<u32>,

    /// Terminal render width in cells
    #[arg(long, global = true)]
    width: Option<u16>,

    /// Terminal render height in cells
    #[arg(long, global = true)]
    height: Option<u16>,

    /// First terminal row of the render region
    #[arg(long, global = true)]
    row_offset: Option<u16>,
}

impl ConfigArgs {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            host: self.host.clone(),
            port: self.port,
            avatar: self.avatar.clone(),
            frame_rate: self.frame_rate,
            width: self.width,
            height: self.height,
            row_offset: self.row_offset,
            reconnect_delay_ms: None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server
    Serve {
        /// Also render the avatar in this terminal
        #[arg(long)]
        terminal: bool,
    },

    /// Set the current state on a running server (used by hooks)
    Set {
        state: String,

        /// Never fail when the server is unreachable
        #[arg(long, short)]
        quiet: bool,
    },

    /// Print the current state
    Get {
        /// Print the full state record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the avatar of a running server in this terminal
    Watch,

    /// Install agent hooks that drive the avatar
    InstallHooks {
        /// Settings file to edit (default: ~/.claude/settings.json)
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Remove agent-avatar hooks
    UninstallHooks {
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Check whether the server is running
    Status,

    /// List installed avatars
    Avatars,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let setup = paths::init_data_dir(cli.data_dir.as_deref()).and_then(|data_dir| {
        let config = AvatarConfig::resolve(
            Some(&paths::global_config_path()),
            paths::project_config_path().as_deref(),
            &cli.config.layer(),
        )?;
        Ok((data_dir, config))
    });
    let (data_dir, config) = match setup {
        Ok(setup) => setup,
        // A broken config file must not fail the agent's hooks either
        Err(_) if tolerates_setup_errors(&cli.command) => return Ok(ExitCode::SUCCESS),
        Err(e) => return Err(e),
    };

    match cli.command {
        Command::Serve { terminal } => cmd_serve(config, terminal).await?,
        Command::Set { state, quiet } => return Ok(cmd_set(&config, &state, quiet).await),
        Command::Get { json } => cmd_get(&config, json).await?,
        Command::Watch => cmd_watch(config).await?,
        Command::InstallHooks { settings } => cmd_install_hooks::install(settings.as_deref())?,
        Command::UninstallHooks { settings } => {
            cmd_install_hooks::uninstall(settings.as_deref())?
        }
        Command::Status => cmd_status::run(&data_dir, &config).await?,
        Command::Avatars => cmd_status::list_avatars(&paths::avatars_dir())?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_serve(config: AvatarConfig, terminal: bool) -> anyhow::Result<()> {
    paths::ensure_dirs()?;
    let _log_guard = logging::init_logging(&paths::log_dir(), LogTarget::Server)?;

    let avatar = resolve_avatar(config.avatar.as_deref(), &paths::avatars_dir())?;
    let script = avatar.script();
    let server = Arc::new(AvatarServer::new(avatar));

    let bind = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local = listener.local_addr()?;

    let pid_path = paths::pid_file_path();
    std::fs::write(&pid_path, std::process::id().to_string())?;

    println!();
    println!(
        "  {} listening on {}",
        style("agent-avatar").cyan(),
        style(format!("http://{local}")).bold()
    );
    println!("  Avatar: {}", server.avatar().manifest.name);
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(
            component = "server",
            event = "server.shutdown.requested",
            "Shutdown requested"
        );
        let _ = shutdown_tx.send(true);
    });

    let viewer = terminal.then(|| {
        let ws_url = format!("ws://{}/ws", loopback(local));
        let settings = config.viewer_settings();
        let stop = shutdown_rx.clone();
        tokio::spawn(async move {
            run_viewer(&ws_url, &settings, &script, stopped(stop)).await
        })
    });

    let result = app::serve(listener, server, stopped(shutdown_rx)).await;

    if let Some(viewer) = viewer {
        match viewer.await {
            Ok(Err(e)) => warn!(
                component = "server",
                event = "server.viewer.failed",
                error = %e,
                "Terminal viewer failed"
            ),
            Err(e) => warn!(
                component = "server",
                event = "server.viewer.panicked",
                error = %e,
                "Terminal viewer task failed"
            ),
            Ok(Ok(())) => {}
        }
    }
    let _ = std::fs::remove_file(&pid_path);
    info!(component = "server", event = "server.stopped", "Server stopped");
    result
}

async fn cmd_set(config: &AvatarConfig, state: &str, quiet: bool) -> ExitCode {
    let base_url = config.base_url();
    match trigger::set_state(&base_url, state).await {
        Ok(SetOutcome::Accepted(accepted)) => {
            if !quiet {
                println!("  {} → {}", accepted.previous, style(&accepted.state).cyan());
            }
            ExitCode::SUCCESS
        }
        Ok(SetOutcome::Rejected(rejection)) => {
            eprintln!("  {} {}", style("error:").red(), rejection.message);
            eprintln!("  Valid states: {}", rejection.valid_states.join(", "));
            ExitCode::FAILURE
        }
        // Hooks must never fail the agent because the avatar is not running
        Err(_) if quiet => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "  {} could not reach agent-avatar at {}: {}",
                style("error:").red(),
                base_url,
                e
            );
            ExitCode::FAILURE
        }
    }
}

async fn cmd_get(config: &AvatarConfig, json: bool) -> anyhow::Result<()> {
    let record = trigger::get_state(&config.base_url())
        .await
        .with_context(|| format!("could not reach agent-avatar at {}", config.base_url()))?;
    if json {
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!("{}", record.state);
    }
    Ok(())
}

async fn cmd_watch(config: AvatarConfig) -> anyhow::Result<()> {
    let _log_guard = logging::init_logging(&paths::log_dir(), LogTarget::Viewer)?;
    let avatar = resolve_avatar(config.avatar.as_deref(), &paths::avatars_dir())?;
    run_viewer(
        &config.ws_url(),
        &config.viewer_settings(),
        &avatar.script(),
        shutdown_signal(),
    )
    .await
}

/// Commands that exit cleanly even when the data dir or config is unusable.
fn tolerates_setup_errors(command: &Command) -> bool {
    matches!(command, Command::Set { quiet: true, .. })
}

/// Address a local client should dial to reach a listener bound to `addr`.
fn loopback(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
    } else {
        addr
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
