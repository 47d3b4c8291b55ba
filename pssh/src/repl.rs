use anyhow::Result;
use pssh_types::{Context, ExitStatus};
use std::io::{self, BufRead, Write};
use tracing::debug;

use crate::shell::Shell;

pub struct Repl<'a> {
    pub shell: &'a mut Shell,
}

impl<'a> Repl<'a> {
    pub fn new(shell: &'a mut Shell) -> Self {
        Repl { shell }
    }

    fn print_banner() {
        println!("                    ________");
        println!("_________________________  /_");
        println!("___  __ \\_  ___/_  ___/_  __ \\");
        println!("__  /_/ /(__  )_(__  )_  / / /");
        println!("_  .___//____/ /____/ /_/ /_/");
        println!("/_/ Type 'exit' or ctrl+d to quit");
        println!();
    }

    fn build_prompt() -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| String::from("?"));
        format!("{cwd}$ ")
    }

    /// The read-eval loop. Child-state changes are drained and reported
    /// at the top of every cycle, never mid-command.
    pub fn run(&mut self, ctx: &mut Context) -> Result<i32> {
        Self::print_banner();
        let stdin = io::stdin();
        let mut line = String::new();

        loop {
            self.shell.drain_child_events();
            self.shell.report_notices();

            print!("{}", Self::build_prompt());
            io::stdout().flush()?;

            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF (ctrl+d)
                debug!("EOF on stdin, exiting");
                return Ok(0);
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if let Err(err) = self.shell.eval_str(ctx, input) {
                // only resource-exhaustion-class failures land here
                eprintln!("pssh: {err:#}");
                return Ok(1);
            }

            if let Some(ExitStatus::ExitedWith(code)) = self.shell.exited {
                debug!("shell exited with {code}");
                return Ok(code);
            }
        }
    }
}
