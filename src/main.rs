//! wsterm - A terminal client for WebSocket shell endpoints
//!
//! wsterm connects your terminal to a remote shell exposed over a
//! WebSocket endpoint, the kind served by dashboard backends at
//! `ws://host:port/terminal?token=...`. Input is line-buffered locally
//! with local echo; command output streams back and is rendered by a
//! built-in VT emulator.
//!
//! # Quick Start
//!
//! ```text
//! wsterm -t <token>                          # default endpoint
//! wsterm -t <token> ws://host:5000/terminal  # explicit endpoint
//! wsterm --token-env DASH_TOKEN              # token from environment
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+S | Start / restart the session |
//! | Ctrl+X | Stop the session |
//! | Ctrl+Q | Quit |

mod config;
mod core;
mod ui;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config as WstermConfig;
use crate::core::session::{Session, SessionState, StopReason};
use crate::ui::{KeyInput, KeyMapper, Renderer, StatusTone};

/// Endpoint used when neither the CLI nor the config file names one.
const DEFAULT_ENDPOINT: &str = "ws://localhost:5000/terminal";

/// Command line options
#[derive(Default)]
struct Cli {
    /// Terminal endpoint URL
    endpoint: Option<String>,
    /// Auth token given directly
    token: Option<String>,
    /// Environment variable to read the token from
    token_env: Option<String>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("wsterm {}", VERSION);
}

fn print_help() {
    eprintln!("wsterm {} - A terminal client for WebSocket shell endpoints", VERSION);
    eprintln!();
    eprintln!("Usage: wsterm [OPTIONS] [ENDPOINT]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  ENDPOINT              ws:// or wss:// URL of the shell endpoint");
    eprintln!("                        (default: {})", DEFAULT_ENDPOINT);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -e, --endpoint <URL>  Same as the ENDPOINT argument");
    eprintln!("  -t, --token <TOKEN>   Auth token passed to the endpoint");
    eprintln!("      --token-env <VAR> Read the auth token from an environment variable");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+S                Start / restart the session");
    eprintln!("  Ctrl+X                Stop the session");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.wsterm/config.toml (endpoint, token, status bar)");
    eprintln!("Log file:      ~/.wsterm/wsterm.log (filter with WSTERM_LOG)");
}

fn parse_args() -> Result<Cli, String> {
    let args: Vec<String> = env::args().collect();
    let mut cli = Cli::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-e" | "--endpoint" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing endpoint argument".to_string());
                }
                cli.endpoint = Some(args[i].clone());
            }
            "-t" | "--token" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing token argument".to_string());
                }
                cli.token = Some(args[i].clone());
            }
            "--token-env" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing variable name argument".to_string());
                }
                cli.token_env = Some(args[i].clone());
            }
            arg if !arg.starts_with('-') && cli.endpoint.is_none() => {
                cli.endpoint = Some(arg.to_string());
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(cli)
}

fn resolve_token(cli: &Cli, config: &WstermConfig) -> String {
    if let Some(token) = &cli.token {
        return token.clone();
    }
    if let Some(var) = &cli.token_env {
        if let Ok(token) = env::var(var) {
            return token;
        }
        eprintln!("Warning: environment variable {} is not set", var);
    }
    config.token.clone().unwrap_or_default()
}

fn init_logging() {
    let log_path = config::data_dir()
        .map(|dir| dir.join("wsterm.log"))
        .unwrap_or_else(|| PathBuf::from("wsterm.log"));

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter =
            EnvFilter::try_from_env("WSTERM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("Error: {}", err);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("wsterm starting...");

    let config = WstermConfig::load();
    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| config.endpoint.clone())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let token = resolve_token(&cli, &config);

    info!("Endpoint: {}", endpoint);
    if token.is_empty() {
        info!("No auth token supplied");
    }

    run_client(&endpoint, &token, &config)
}

fn run_client(endpoint: &str, token: &str, config: &WstermConfig) -> anyhow::Result<()> {
    let (cols, rows) = Renderer::size()?;
    info!("Terminal size: {}x{}", cols, rows);

    let status_rows: u16 = if config.status_bar.visible { 1 } else { 0 };

    let mut renderer = Renderer::new();
    renderer.init()?;

    let mut session = Session::new(endpoint);
    // The surface exists only now that the renderer owns the terminal
    session.surface_ready(cols, rows.saturating_sub(status_rows).max(1));

    // Launching the client is the explicit start; later restarts need
    // the start key again.
    session.activate(token);

    let result = run_main_loop(&mut session, &mut renderer, endpoint, token, status_rows);

    session.deactivate(StopReason::HostExit);
    let _ = renderer.cleanup();

    result
}

/// Main event loop
fn run_main_loop(
    session: &mut Session,
    renderer: &mut Renderer,
    endpoint: &str,
    token: &str,
    status_rows: u16,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut last_state = session.state().clone();
    let mut force_render = true;

    loop {
        session.pump();

        let state_changed = *session.state() != last_state;
        if state_changed {
            last_state = session.state().clone();
        }

        let grid_dirty = session
            .emulator()
            .map(|emulator| emulator.screen().grid().has_changes())
            .unwrap_or(false);

        if grid_dirty || state_changed || force_render {
            let (mut status, tone) = status_line(session.state(), endpoint, token);
            // Remote applications set the title via OSC; surface it
            if *session.state() == SessionState::Connected {
                if let Some(emulator) = session.emulator() {
                    let title = &emulator.screen().title;
                    if !title.is_empty() {
                        status = format!("{} | {}", title, status);
                    }
                }
            }
            let status = (status_rows > 0).then_some((status.as_str(), tone));
            renderer.render(session.emulator().map(|e| e.screen()), status)?;
            if let Some(emulator) = session.emulator_mut() {
                emulator.screen_mut().grid_mut().clear_changes();
            }
            force_render = false;
        }

        if event::poll(poll_timeout)? {
            match event::read()? {
                Event::Key(key_event) => {
                    if key_event.kind != KeyEventKind::Press {
                        continue;
                    }
                    match KeyMapper::map(&key_event) {
                        KeyInput::Char(ch) => session.on_keystroke(ch),
                        KeyInput::Start => {
                            session.activate(token);
                            force_render = true;
                        }
                        KeyInput::Stop => {
                            session.deactivate(StopReason::UserStop);
                            force_render = true;
                        }
                        KeyInput::Quit => break,
                        KeyInput::None => {}
                    }
                }

                Event::Resize(new_cols, new_rows) => {
                    info!("Resize: {}x{}", new_cols, new_rows);
                    session.handle_resize(new_cols, new_rows.saturating_sub(status_rows).max(1));
                    force_render = true;
                }

                _ => {}
            }
        }
    }

    Ok(())
}

fn status_line(state: &SessionState, endpoint: &str, token: &str) -> (String, StatusTone) {
    match state {
        SessionState::Idle => {
            if token.is_empty() {
                (
                    "idle | no auth token (run with -t or --token-env)".to_string(),
                    StatusTone::Neutral,
                )
            } else {
                ("idle | Ctrl+S start | Ctrl+Q quit".to_string(), StatusTone::Neutral)
            }
        }
        SessionState::Initializing => {
            (format!("connecting to {}...", endpoint), StatusTone::Busy)
        }
        SessionState::Connected => (
            "connected | Ctrl+X stop | Ctrl+Q quit".to_string(),
            StatusTone::Good,
        ),
        SessionState::Disconnected(reason) => (
            format!("disconnected: {} | Ctrl+S restart | Ctrl+Q quit", reason),
            StatusTone::Bad,
        ),
        SessionState::Stopped => (
            "stopped | Ctrl+S restart | Ctrl+Q quit".to_string(),
            StatusTone::Neutral,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_reflects_state() {
        let (text, tone) = status_line(&SessionState::Connected, "ws://x", "tok");
        assert!(text.contains("connected"));
        assert_eq!(tone, StatusTone::Good);

        let (text, tone) = status_line(
            &SessionState::Disconnected("code 1006".to_string()),
            "ws://x",
            "tok",
        );
        assert!(text.contains("code 1006"));
        assert_eq!(tone, StatusTone::Bad);

        let (text, _) = status_line(&SessionState::Idle, "ws://x", "");
        assert!(text.contains("no auth token"));
    }
}
