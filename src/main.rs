//! Interactive console for a BLE UART peripheral.
//!
//! Run with: cargo run -- --help

use anyhow::Context;
use ble_uart_remote::{
    BtleplugPlatform, Command, ConnectionState, Controller, ControllerHandle, RemoteConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ble-uart-remote")]
#[command(about = "Switch a BLE UART peripheral (HC-08, HM-10, ...) on and off")]
struct Args {
    /// Configuration file (defaults to <config dir>/ble-uart-remote/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Service identifier, e.g. FFE0 or a 128-bit UUID
    #[arg(long)]
    service: Option<String>,

    /// Characteristic identifier, e.g. FFE1
    #[arg(long = "char", value_name = "CHARACTERISTIC")]
    characteristic: Option<String>,

    /// Send text commands (LIGAR/DESLIGAR) instead of single bytes (a/b)
    #[arg(long)]
    text_mode: bool,

    /// Device name prefix filter; repeat for several
    #[arg(long = "prefix", value_name = "PREFIX")]
    name_prefixes: Vec<String>,

    /// Scan timeout in milliseconds
    #[arg(long)]
    scan_timeout_ms: Option<u64>,

    /// Ring the terminal bell on every action
    #[arg(long)]
    bell: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// A console line, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Connect,
    Disconnect,
    Send(Command),
    TextMode(bool),
    Service(String),
    Characteristic(String),
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  connect | c           connect to the peripheral
  disconnect | d        disconnect
  on | off              send the on/off command
  text on|off           toggle text-mode commands
  service <id>          set the service identifier
  char <id>             set the characteristic identifier
  status                show the connection state
  help                  this text
  quit | exit           disconnect and leave";

fn parse_line(line: &str) -> Option<Result<ConsoleCommand, String>> {
    let mut words = line.split_whitespace();
    let verb = words.next()?.to_ascii_lowercase();
    let arg = words.next().unwrap_or("");

    let command = match verb.as_str() {
        "connect" | "c" => ConsoleCommand::Connect,
        "disconnect" | "d" => ConsoleCommand::Disconnect,
        "on" => ConsoleCommand::Send(Command::On),
        "off" => ConsoleCommand::Send(Command::Off),
        "text" => match arg.to_ascii_lowercase().as_str() {
            "on" => ConsoleCommand::TextMode(true),
            "off" => ConsoleCommand::TextMode(false),
            _ => return Some(Err("usage: text on|off".to_string())),
        },
        "service" => ConsoleCommand::Service(arg.to_string()),
        "char" => ConsoleCommand::Characteristic(arg.to_string()),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Some(Err(format!("unknown command '{}', try 'help'", other))),
    };

    Some(Ok(command))
}

fn load_config(args: &Args) -> anyhow::Result<RemoteConfig> {
    let mut config = match &args.config {
        Some(path) => RemoteConfig::load(path)?,
        None => RemoteConfig::load_or_default()?,
    };

    if args.service.is_some() || args.characteristic.is_some() {
        let service = args.service.clone().unwrap_or_else(|| config.service.clone());
        let characteristic = args
            .characteristic
            .clone()
            .unwrap_or_else(|| config.characteristic.clone());
        config.set_identifiers(&service, &characteristic);
    }
    if args.text_mode {
        config.text_mode = true;
    }
    if !args.name_prefixes.is_empty() {
        config.name_prefixes = args.name_prefixes.clone();
    }
    if let Some(timeout) = args.scan_timeout_ms {
        config.scan_timeout_ms = timeout;
    }
    if args.bell {
        config.feedback = ble_uart_remote::feedback::FeedbackKind::Bell;
    }

    Ok(config)
}

/// Print status lines as they come in.
fn spawn_status_printer(remote: &ControllerHandle) {
    let mut rx = remote.subscribe_status();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    println!("[{}] Status: {}", update.at.format("%H:%M:%S"), update.text)
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} status lines", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Current text of the two identifier fields.
struct Fields {
    service: String,
    characteristic: String,
}

async fn execute(
    remote: &ControllerHandle,
    fields: &mut Fields,
    command: ConsoleCommand,
) -> anyhow::Result<bool> {
    match command {
        ConsoleCommand::Connect => {
            if let Err(e) = remote.connect().await {
                println!("Connect failed: {}", e);
            }
        }
        ConsoleCommand::Disconnect => {
            if let Err(e) = remote.disconnect().await {
                println!("Disconnect failed: {}", e);
            }
        }
        ConsoleCommand::Send(command) => {
            if let Err(e) = remote.send(command).await {
                println!("{} not sent: {}", command, e);
            }
        }
        ConsoleCommand::TextMode(enabled) => {
            remote.set_text_mode(enabled).await?;
            println!("Text mode {}", if enabled { "on" } else { "off" });
        }
        ConsoleCommand::Service(service) => {
            let (service, characteristic) =
                remote.set_identifiers(&service, &fields.characteristic).await?;
            println!("svc={} char={}", service, characteristic);
            *fields = Fields {
                service,
                characteristic,
            };
        }
        ConsoleCommand::Characteristic(characteristic) => {
            let (service, characteristic) =
                remote.set_identifiers(&fields.service, &characteristic).await?;
            println!("svc={} char={}", service, characteristic);
            *fields = Fields {
                service,
                characteristic,
            };
        }
        ConsoleCommand::Status => {
            let state = remote.state();
            println!("{}", state);
            if state == ConnectionState::Connecting {
                println!("(connect in progress)");
            }
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "ble_uart_remote=debug"
    } else {
        "ble_uart_remote=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().context("log directive")?),
        )
        .init();

    let config = load_config(&args)?;
    info!(
        "svc={} char={} text_mode={}",
        config.service, config.characteristic, config.text_mode
    );

    let platform = Arc::new(
        BtleplugPlatform::new(config.scan_timeout())
            .await
            .context("Bluetooth is not available on this system")?,
    );
    let mut fields = Fields {
        service: config.service.clone(),
        characteristic: config.characteristic.clone(),
    };
    let feedback = config.feedback.build();
    let remote = Controller::spawn(platform, config, feedback)?;

    spawn_status_printer(&remote);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            None => continue,
            Some(Err(message)) => println!("{}", message),
            Some(Ok(command)) => {
                if !execute(&remote, &mut fields, command).await? {
                    break;
                }
            }
        }
    }

    remote.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("connect"), Some(Ok(ConsoleCommand::Connect)));
        assert_eq!(parse_line("C"), Some(Ok(ConsoleCommand::Connect)));
        assert_eq!(
            parse_line("on"),
            Some(Ok(ConsoleCommand::Send(Command::On)))
        );
        assert_eq!(
            parse_line("text ON"),
            Some(Ok(ConsoleCommand::TextMode(true)))
        );
        assert_eq!(
            parse_line("service 0xFFE0"),
            Some(Ok(ConsoleCommand::Service("0xFFE0".to_string())))
        );
        assert!(matches!(parse_line("text"), Some(Err(_))));
        assert!(matches!(parse_line("launch"), Some(Err(_))));
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::parse_from([
            "ble-uart-remote",
            "--config",
            "/nonexistent/ble-uart-remote.json",
        ]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "ble-uart-remote",
            "--service",
            "ffe0",
            "--char",
            "0xFFE1",
            "--prefix",
            "HM",
            "--prefix",
            "HC",
            "--text-mode",
        ]);
        assert_eq!(args.characteristic.as_deref(), Some("0xFFE1"));
        assert_eq!(args.name_prefixes, vec!["HM", "HC"]);
        assert!(args.text_mode);
    }
}
