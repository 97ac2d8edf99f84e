#![forbid(unsafe_code)]

//! `server-warden-ctl`: local CLI companion for `server-warden`.
//!
//! Connects to the IPC socket, sends one JSON command, and prints the
//! response.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "server-warden-ctl",
    about = "Local CLI for the server-warden daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "server-warden")]
    ipc_name: String,

    /// Shared secret matching the daemon's `ipc_auth_token`.
    #[arg(long)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Show server state, version, and schedules.
    Status,
    /// Start the server.
    Start,
    /// Stop the server.
    Stop,
    /// Restart the server.
    Restart,
    /// Stop the server if needed and update it with `SteamCMD`.
    Update,
    /// Take a backup now.
    Backup,
    /// Hold scheduled backups.
    PauseBackups,
    /// Release held scheduled backups.
    ResumeBackups,
    /// Restart the server now, skipping the warning window.
    ForceRestart,
}

impl Command {
    fn verb(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Update => "update",
            Self::Backup => "backup",
            Self::PauseBackups => "pause-backups",
            Self::ResumeBackups => "resume-backups",
            Self::ForceRestart => "force-restart",
        }
    }
}

fn main() {
    let args = Cli::parse();

    let mut request = serde_json::json!({ "command": args.command.verb() });
    if let Some(token) = args.auth_token.as_deref() {
        request["auth_token"] = token.into();
    }

    let response = match send_ipc_command(&args.ipc_name, &request) {
        Ok(response) => response,
        Err(err) => {
            eprintln!("Failed to reach server-warden over '{}': {err}", args.ipc_name);
            eprintln!("Check that the daemon is running with the same ipc_name.");
            std::process::exit(2);
        }
    };

    if !print_response(&response) {
        std::process::exit(1);
    }
}

/// Print a daemon response; `false` when it reports a failure.
fn print_response(response: &serde_json::Value) -> bool {
    let ok = response["ok"].as_bool().unwrap_or(false);
    if !ok {
        let message = response["error"].as_str().unwrap_or("unknown error");
        eprintln!("Error: {message}");
        return false;
    }

    match response.get("data") {
        Some(data) => match serde_json::to_string_pretty(data) {
            Ok(rendered) => println!("{rendered}"),
            Err(_) => println!("{data}"),
        },
        None => println!("OK"),
    }
    true
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
