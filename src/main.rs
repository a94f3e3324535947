//! CLI Entry Point for rs485-monitor
//!
//! A terminal front-end over [`MonitorClient`]:
//! - List serial ports
//! - Connect to a meter and stream readings plus the activity log
//! - Wait for a meter to appear and connect automatically
//!
//! While a session runs, every line typed on stdin is sent to the device as a
//! command (the meter understands `rs` and `r`). Ctrl-C or end of input closes
//! the session.
//!
//! # Usage
//!
//! ```bash
//! rs485-monitor ports
//! rs485-monitor monitor --port /dev/ttyUSB0 --baud 115200
//! rs485-monitor auto
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rs485_monitor::config::MonitorConfig;
use rs485_monitor::display::ReadingBoard;
use rs485_monitor::logging::{self, OutputFormat, TracingConfig};
use rs485_monitor::{BaudRate, ClientEvents, ConnectionState, MonitorClient};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "rs485-monitor")]
#[command(about = "Monitor for RS-485 power-metering devices", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/monitor.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic log format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Connect to a port and stream readings
    Monitor {
        /// Serial port (e.g. /dev/ttyUSB0, COM3)
        #[arg(long)]
        port: String,

        /// Baud rate: 9600, 19200, 38400, 57600 or 115200
        #[arg(long, value_parser = parse_baud)]
        baud: Option<BaudRate>,
    },

    /// Probe ports until a meter answers, then stream readings
    Auto {
        /// Baud rate: 9600, 19200, 38400, 57600 or 115200
        #[arg(long, value_parser = parse_baud)]
        baud: Option<BaudRate>,
    },
}

fn parse_baud(value: &str) -> Result<BaudRate, String> {
    let rate: u32 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    BaudRate::try_from(rate).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MonitorConfig::load_from(path),
        None => MonitorConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    logging::init(
        TracingConfig::from_monitor_config(&config)?
            .with_format(cli.log_format)
            .with_ansi(std::io::stderr().is_terminal()),
    )?;

    let (client, mut events) = MonitorClient::from_config(&config);

    match cli.command {
        Commands::Ports => {
            let ports = client.list_ports();
            print_logs(&mut events);
            if ports.is_empty() {
                println!("No serial ports detected.");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
        Commands::Monitor { port, baud } => {
            let baud = baud.unwrap_or(config.serial.baud_rate);
            let connected = client.connect(port.as_str(), baud).await;
            print_logs(&mut events);
            connected.with_context(|| format!("Could not connect to {port}"))?;
            run_session(client, events).await
        }
        Commands::Auto { baud } => {
            client.arm_auto_reconnect(baud.unwrap_or(config.serial.baud_rate));
            run_session(client, events).await
        }
    }
}

fn print_logs(events: &mut ClientEvents) {
    for event in events.drain_logs() {
        println!("{event}");
    }
}

/// Print events and forward stdin until Ctrl-C or end of input, then close
/// the session whichever way the loop ended.
async fn run_session(client: MonitorClient, mut events: ClientEvents) -> Result<()> {
    let result = pump(&client, &mut events).await;
    client.shutdown().await;
    print_logs(&mut events);
    result
}

async fn pump(client: &MonitorClient, events: &mut ClientEvents) -> Result<()> {
    let mut board = ReadingBoard::new();
    let mut connected = client.state().await == ConnectionState::Connected;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.logs.recv() => {
                println!("{event}");
                let now_connected = client.state().await == ConnectionState::Connected;
                if connected && !now_connected {
                    board.reset();
                    println!("{board}");
                }
                connected = now_connected;
            }
            Some(reading) = events.readings.recv() => {
                board.apply(&reading);
                println!("{board}");
            }
            line = stdin.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(command) => {
                        let command = command.trim();
                        if !command.is_empty() {
                            if let Err(e) = client.send_command(command).await {
                                eprintln!("Send failed: {e}");
                            }
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = &mut shutdown => return Ok(()),
        }
    }
}
