use anyhow::Result;
use clap::Parser;
use pssh_types::Context;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod jobs;
mod parser;
mod process;
mod proxy;
mod repl;
mod shell;
mod terminal;

#[derive(Parser)]
#[command(version, about = "A job-control command shell", long_about = None)]
struct Cli {
    /// Run a single command and exit
    #[arg(short, long)]
    command: Option<String>,
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("pssh: failed to initialize tracing: {err}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("pssh: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logging goes to the file named by PSSH_LOG; the terminal stays clean
/// for the jobs that share it. No subscriber is installed otherwise.
fn init_tracing() -> Result<()> {
    let Ok(path) = std::env::var("PSSH_LOG") else {
        return Ok(());
    };
    let file = std::sync::Arc::new(std::fs::File::create(path)?);
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_writer(file)
        .init();
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    let mut shell = shell::Shell::new()?;
    shell.set_signals();
    let mut ctx = Context::new(shell.pid, shell.pgid, true);

    if let Some(command) = cli.command.as_deref() {
        debug!("command mode: {command}");
        shell.eval_str(&mut ctx, command.trim())?;
        shell.drain_child_events();
        Ok(0)
    } else {
        debug!("interactive mode");
        let mut repl = repl::Repl::new(&mut shell);
        repl.run(&mut ctx)
    }
}
