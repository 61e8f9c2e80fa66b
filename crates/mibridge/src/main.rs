use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use mibridge::{MiConfig, MiSession, SessionEvent, Transcript, Transport};

/// Forward MI commands from stdin to a debugger and print every record.
#[derive(Debug, Parser)]
#[command(name = "mibridge", version)]
struct Args {
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Debugger executable; overrides the configuration.
    #[arg(long)]
    debugger: Option<PathBuf>,
    /// Program handed to the debugger.
    program: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run(Args::parse()) {
        eprintln!("mibridge error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => MiConfig::load(path)?,
        None => MiConfig::default(),
    };
    if let Some(debugger) = args.debugger {
        config.debugger_path = debugger;
    }

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .init();

    let mut command = Command::new(&config.debugger_path);
    command.args(&config.debugger_args);
    if let Some(program) = &args.program {
        command.arg(program);
    }
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start {}", config.debugger_path.display()))?;
    info!(debugger = %config.debugger_path.display(), pid = child.id(), "debugger started");

    let transcript = config
        .transcript
        .as_ref()
        .map(Transcript::create)
        .transpose()?;
    let session = MiSession::with_options(
        Transport::from_child(&mut child)?,
        config.command_timeout,
        transcript,
    )?;
    session.subscribe(|event| match event {
        SessionEvent::OutOfBand(record) => println!("{record}"),
        SessionEvent::UnmatchedResult(record) => println!("{record}"),
        SessionEvent::Diagnostic { line, error } => warn!(line = %line, "{error}"),
        SessionEvent::Terminated => info!("debugger session ended"),
    });

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        match session.send_raw(command) {
            Ok(record) => println!("{record}"),
            Err(err) if err.is_fatal() => {
                session.close();
                return Err(err.into());
            }
            Err(err) => eprintln!("{err}"),
        }
    }

    if !session.is_terminated() {
        if let Err(err) = session.send("-gdb-exit") {
            warn!("-gdb-exit failed: {err}");
        }
    }
    session.close();
    let status = child.wait().context("failed to wait for debugger")?;
    info!(%status, "debugger exited");
    Ok(())
}
